//! Tool registry and dispatch
//!
//! Tools are named, schema-validated operations invokable by slash
//! command or through the tool-execute endpoint. Local tools bind to the
//! retrieval engine; remote tools POST their validated parameters to a
//! configured analytic endpoint with bearer credentials.

pub mod dispatch;
pub mod format;
pub mod parser;

pub use dispatch::{DispatchState, ToolDispatcher};
pub use parser::ParsedCommand;

use loreforge_common::config::ToolsConfig;
use loreforge_common::llm::ToolDeclaration;

/// Parameter type accepted by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Array,
}

/// One declared tool parameter
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
}

impl ToolParameter {
    const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
        }
    }

    const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
        }
    }
}

/// Local handlers bound to the retrieval engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTool {
    SearchKnowledge,
    HydeSearch,
    MultiSearch,
}

/// How a tool executes
#[derive(Debug, Clone)]
pub enum ToolBinding {
    Local(LocalTool),
    /// Resolved remote endpoint; None when the endpoint base is not
    /// configured, which fails the dispatch with a config error
    Remote(Option<String>),
}

/// Immutable tool descriptor
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub command: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ToolParameter>,
    pub binding: ToolBinding,
    pub examples: Vec<&'static str>,
}

impl ToolDescriptor {
    /// Function declaration for model-directed calling
    pub fn declaration(&self) -> ToolDeclaration {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for parameter in &self.parameters {
            let kind = match parameter.kind {
                ParamKind::String => serde_json::json!({
                    "type": "string",
                    "description": parameter.description,
                }),
                ParamKind::Number => serde_json::json!({
                    "type": "number",
                    "description": parameter.description,
                }),
                ParamKind::Array => serde_json::json!({
                    "type": "array",
                    "items": { "type": "string" },
                    "description": parameter.description,
                }),
            };
            properties.insert(parameter.name.to_string(), kind);
            if parameter.required {
                required.push(parameter.name);
            }
        }

        ToolDeclaration {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// The immutable registry of built-in tools
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// Build the registry, resolving remote endpoints from configuration
    pub fn builtin(config: &ToolsConfig) -> Self {
        let remote = |path: &str| {
            ToolBinding::Remote(
                config
                    .endpoint_base
                    .as_ref()
                    .map(|base| format!("{}/{}", base.trim_end_matches('/'), path)),
            )
        };

        let tools = vec![
            ToolDescriptor {
                name: "search_knowledge",
                command: "/search",
                description: "Search the knowledge base",
                parameters: vec![
                    ToolParameter::required("query", ParamKind::String, "What to search for"),
                    ToolParameter::optional("mode", ParamKind::String, "semantic, keyword, hybrid, or graph"),
                    ToolParameter::optional("limit", ParamKind::Number, "Maximum results"),
                ],
                binding: ToolBinding::Local(LocalTool::SearchKnowledge),
                examples: vec!["/search --mode=semantic flow states", "/search chess openings"],
            },
            ToolDescriptor {
                name: "hyde_search",
                command: "/hyde",
                description: "Search via a hypothetical answer embedding",
                parameters: vec![
                    ToolParameter::required("query", ParamKind::String, "Question to answer hypothetically"),
                    ToolParameter::optional("limit", ParamKind::Number, "Maximum results"),
                ],
                binding: ToolBinding::Local(LocalTool::HydeSearch),
                examples: vec!["/hyde how do I structure a practice session?"],
            },
            ToolDescriptor {
                name: "multi_search",
                command: "/mqsearch",
                description: "Search with the original query plus rewrites",
                parameters: vec![
                    ToolParameter::required("query", ParamKind::String, "What to search for"),
                    ToolParameter::optional("variants", ParamKind::Array, "Extra query phrasings"),
                    ToolParameter::optional("limit", ParamKind::Number, "Maximum results"),
                ],
                binding: ToolBinding::Local(LocalTool::MultiSearch),
                examples: vec!["/mqsearch --variants=focus,attention deep work"],
            },
            ToolDescriptor {
                name: "clos_analyze",
                command: "/clos",
                description: "Run a CLOS cognitive-layer analysis",
                parameters: vec![
                    ToolParameter::required("input", ParamKind::String, "Subject of the analysis"),
                    ToolParameter::optional("depth", ParamKind::Number, "Analysis depth"),
                ],
                binding: remote("clos"),
                examples: vec!["/clos --depth=2 morning routine"],
            },
            ToolDescriptor {
                name: "chess_analyze",
                command: "/chess",
                description: "Analyze a chess position or game",
                parameters: vec![
                    ToolParameter::required("input", ParamKind::String, "FEN, PGN, or description"),
                    ToolParameter::optional("lines", ParamKind::Number, "Engine lines to return"),
                ],
                binding: remote("chess"),
                examples: vec!["/chess rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b"],
            },
            ToolDescriptor {
                name: "neural_metrics",
                command: "/neural",
                description: "Fetch neural/cognitive metrics",
                parameters: vec![
                    ToolParameter::optional("input", ParamKind::String, "Metric or question"),
                    ToolParameter::optional("window", ParamKind::Number, "Window in days"),
                ],
                binding: remote("neural"),
                examples: vec!["/neural --window=7 focus trend"],
            },
            ToolDescriptor {
                name: "artifact_generate",
                command: "/artifact",
                description: "Generate a mental artifact from a topic",
                parameters: vec![
                    ToolParameter::required("input", ParamKind::String, "Topic to distill"),
                    ToolParameter::optional("kind", ParamKind::String, "Artifact kind"),
                ],
                binding: remote("artifact"),
                examples: vec!["/artifact --kind=summary spaced repetition"],
            },
        ];

        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn by_command(&self, command: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.command == command)
    }

    pub fn all(&self) -> &[ToolDescriptor] {
        &self.tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_commands_unique() {
        let registry = ToolRegistry::builtin(&ToolsConfig::default());
        let mut commands: Vec<_> = registry.all().iter().map(|t| t.command).collect();
        let count = commands.len();
        commands.sort();
        commands.dedup();
        assert_eq!(commands.len(), count);
        assert_eq!(count, 7);
    }

    #[test]
    fn test_lookup_by_name_and_command() {
        let registry = ToolRegistry::builtin(&ToolsConfig::default());
        assert!(registry.get("search_knowledge").is_some());
        assert_eq!(
            registry.by_command("/chess").map(|t| t.name),
            Some("chess_analyze")
        );
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_declaration_schema() {
        let registry = ToolRegistry::builtin(&ToolsConfig::default());
        let declaration = registry.get("search_knowledge").unwrap().declaration();
        assert_eq!(declaration.name, "search_knowledge");
        assert_eq!(declaration.parameters["type"], "object");
        assert_eq!(
            declaration.parameters["properties"]["query"]["type"],
            "string"
        );
        assert_eq!(declaration.parameters["required"], serde_json::json!(["query"]));
    }

    #[test]
    fn test_remote_endpoints_resolved_from_config() {
        let config = ToolsConfig {
            endpoint_base: Some("https://tools.example.com/api/".to_string()),
            bearer_token: None,
            timeout_secs: 30,
        };
        let registry = ToolRegistry::builtin(&config);
        match &registry.get("clos_analyze").unwrap().binding {
            ToolBinding::Remote(Some(url)) => {
                assert_eq!(url, "https://tools.example.com/api/clos");
            }
            other => panic!("unexpected binding: {:?}", other),
        }

        let registry = ToolRegistry::builtin(&ToolsConfig::default());
        assert!(matches!(
            registry.get("clos_analyze").unwrap().binding,
            ToolBinding::Remote(None)
        ));
    }
}
