use serde::{Deserialize, Serialize};

/// A persisted proxy definition: a named group of upstream MCP servers
/// presented to clients as one virtual server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyDefinition {
    /// Unique identifier, derived from `name` via slugify at creation time
    pub id: String,

    /// Human-readable name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Upstream servers aggregated by this proxy
    #[serde(default)]
    pub servers: Vec<ServerDefinition>,
}

/// One upstream server referenced by a proxy definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerDefinition {
    /// Name, unique within the proxy; used as the namespace prefix
    pub name: String,

    /// Transport-specific configuration
    pub transport: TransportConfig,
}

/// Transport-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// STDIO process configuration
    Stdio {
        /// Full command to execute (parsed using shell-words at spawn time
        /// when `args` is empty)
        /// Example: "npx -y @modelcontextprotocol/server-filesystem /tmp"
        command: String,
        /// Command arguments
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Names of environment variables to pass through; values are
        /// resolved from the proxy process's own environment at spawn time
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        env: Vec<String>,
    },

    /// HTTP with Server-Sent Events configuration
    Sse {
        /// Server URL
        url: String,
    },

    /// Streamable HTTP configuration (single request/response per call)
    StreamableHttp {
        /// Server URL
        url: String,
    },
}

impl TransportConfig {
    /// Short transport kind label for logs and status output
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Sse { .. } => "sse",
            TransportConfig::StreamableHttp { .. } => "streamable_http",
        }
    }

    /// Parse a STDIO command into executable and arguments.
    ///
    /// When `args` is non-empty the fields are used directly; otherwise the
    /// command string is split with shell-words.
    pub fn parse_stdio_command(&self) -> Result<(String, Vec<String>), String> {
        match self {
            TransportConfig::Stdio { command, args, .. } => {
                if !args.is_empty() {
                    return Ok((command.clone(), args.clone()));
                }

                let parts = shell_words::split(command)
                    .map_err(|e| format!("Failed to parse command '{}': {}", command, e))?;

                if parts.is_empty() {
                    return Err("Command is empty".to_string());
                }

                Ok((parts[0].clone(), parts[1..].to_vec()))
            }
            _ => Err("Not a STDIO transport".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_tagged_serde() {
        let json = r#"{"type":"stdio","command":"uvx mcp-server-fetch","env":["API_KEY"]}"#;
        let config: TransportConfig = serde_json::from_str(json).unwrap();
        match &config {
            TransportConfig::Stdio { command, args, env } => {
                assert_eq!(command, "uvx mcp-server-fetch");
                assert!(args.is_empty());
                assert_eq!(env, &["API_KEY".to_string()]);
            }
            _ => panic!("expected stdio config"),
        }
        assert_eq!(config.kind(), "stdio");

        let json = r#"{"type":"streamable_http","url":"http://localhost:9000/mcp"}"#;
        let config: TransportConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind(), "streamable_http");
    }

    #[test]
    fn test_parse_stdio_command_string() {
        let config = TransportConfig::Stdio {
            command: "npx -y @modelcontextprotocol/server-everything".to_string(),
            args: vec![],
            env: vec![],
        };

        let (executable, args) = config.parse_stdio_command().unwrap();
        assert_eq!(executable, "npx");
        assert_eq!(args, vec!["-y", "@modelcontextprotocol/server-everything"]);
    }

    #[test]
    fn test_parse_stdio_command_explicit_args() {
        let config = TransportConfig::Stdio {
            command: "echo".to_string(),
            args: vec!["hello world".to_string()],
            env: vec![],
        };

        let (executable, args) = config.parse_stdio_command().unwrap();
        assert_eq!(executable, "echo");
        assert_eq!(args, vec!["hello world"]);
    }

    #[test]
    fn test_parse_stdio_command_empty() {
        let config = TransportConfig::Stdio {
            command: "".to_string(),
            args: vec![],
            env: vec![],
        };
        assert!(config.parse_stdio_command().is_err());

        let config = TransportConfig::Sse {
            url: "http://localhost:9000/sse".to_string(),
        };
        assert!(config.parse_stdio_command().is_err());
    }

    #[test]
    fn test_proxy_definition_roundtrip() {
        let def = ProxyDefinition {
            id: "dev-tools".to_string(),
            name: "Dev Tools".to_string(),
            description: Some("Local development servers".to_string()),
            servers: vec![ServerDefinition {
                name: "fetch".to_string(),
                transport: TransportConfig::Sse {
                    url: "http://localhost:9000/sse".to_string(),
                },
            }],
        };

        let json = serde_json::to_string(&def).unwrap();
        let parsed: ProxyDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, def);
    }
}
