//! Name routing across targets
//!
//! The routing table is rebuilt wholesale from fresh target listings. Exposed
//! names map back to the owning target and the target's original name.
//!
//! Naming rules:
//! - a name unique across targets is exposed bare
//! - when two or more targets expose the same name, every colliding entry is
//!   exposed as `target__name` so no target shadows another
//! - descriptions are always prefixed with `[target] ` so clients can tell
//!   entries apart regardless of namespacing

use std::collections::HashMap;

use tracing::warn;

use sb_types::{McpPrompt, McpResource, McpResourceTemplate, McpTool};

/// Separator between target name and original name in namespaced entries
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Where an exposed name routes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target: String,
    pub original_name: String,
}

/// Everything one target currently advertises
#[derive(Debug, Default)]
pub struct TargetListing {
    pub target: String,
    pub tools: Vec<McpTool>,
    pub resources: Vec<McpResource>,
    pub templates: Vec<McpResourceTemplate>,
    pub prompts: Vec<McpPrompt>,
}

/// Merged view over all connected targets
#[derive(Debug, Default)]
pub struct RoutingTable {
    pub tools: Vec<McpTool>,
    pub resources: Vec<McpResource>,
    pub templates: Vec<McpResourceTemplate>,
    pub prompts: Vec<McpPrompt>,

    tool_routes: HashMap<String, Route>,
    prompt_routes: HashMap<String, Route>,
    /// Resource URIs route directly; the URI is the original name
    resource_routes: HashMap<String, String>,
}

impl RoutingTable {
    /// Build a table from fresh listings. Input order does not matter; the
    /// merged lists are sorted by exposed name for stable output.
    pub fn build(listings: Vec<TargetListing>) -> Self {
        let mut table = Self::default();

        let tool_counts = count_names(
            listings
                .iter()
                .flat_map(|l| l.tools.iter().map(|t| t.name.as_str())),
        );
        let prompt_counts = count_names(
            listings
                .iter()
                .flat_map(|l| l.prompts.iter().map(|p| p.name.as_str())),
        );

        for listing in &listings {
            for tool in &listing.tools {
                let exposed = exposed_name(&listing.target, &tool.name, &tool_counts);
                table.tool_routes.insert(
                    exposed.clone(),
                    Route {
                        target: listing.target.clone(),
                        original_name: tool.name.clone(),
                    },
                );
                table.tools.push(McpTool {
                    name: exposed,
                    description: Some(prefix_description(
                        &listing.target,
                        tool.description.as_deref(),
                    )),
                    input_schema: tool.input_schema.clone(),
                });
            }

            for prompt in &listing.prompts {
                let exposed = exposed_name(&listing.target, &prompt.name, &prompt_counts);
                table.prompt_routes.insert(
                    exposed.clone(),
                    Route {
                        target: listing.target.clone(),
                        original_name: prompt.name.clone(),
                    },
                );
                table.prompts.push(McpPrompt {
                    name: exposed,
                    description: Some(prefix_description(
                        &listing.target,
                        prompt.description.as_deref(),
                    )),
                    arguments: prompt.arguments.clone(),
                });
            }

            for resource in &listing.resources {
                // URIs cannot be renamed; on collision the first target keeps it
                if table.resource_routes.contains_key(&resource.uri) {
                    warn!(
                        "Resource URI '{}' already exposed, skipping copy from '{}'",
                        resource.uri, listing.target
                    );
                    continue;
                }
                table
                    .resource_routes
                    .insert(resource.uri.clone(), listing.target.clone());
                table.resources.push(McpResource {
                    uri: resource.uri.clone(),
                    name: resource.name.clone(),
                    description: Some(prefix_description(
                        &listing.target,
                        resource.description.as_deref(),
                    )),
                    mime_type: resource.mime_type.clone(),
                });
            }

            for template in &listing.templates {
                table.templates.push(McpResourceTemplate {
                    uri_template: template.uri_template.clone(),
                    name: template.name.clone(),
                    description: Some(prefix_description(
                        &listing.target,
                        template.description.as_deref(),
                    )),
                    mime_type: template.mime_type.clone(),
                });
            }
        }

        table.tools.sort_by(|a, b| a.name.cmp(&b.name));
        table.prompts.sort_by(|a, b| a.name.cmp(&b.name));
        table.resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        table.templates.sort_by(|a, b| a.uri_template.cmp(&b.uri_template));

        table
    }

    pub fn route_tool(&self, exposed: &str) -> Option<&Route> {
        self.tool_routes.get(exposed)
    }

    pub fn route_prompt(&self, exposed: &str) -> Option<&Route> {
        self.prompt_routes.get(exposed)
    }

    /// Target owning a resource URI
    pub fn route_resource(&self, uri: &str) -> Option<&str> {
        self.resource_routes.get(uri).map(String::as_str)
    }
}

fn count_names<'a>(names: impl Iterator<Item = &'a str>) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for name in names {
        *counts.entry(name).or_insert(0) += 1;
    }
    counts
}

fn exposed_name(target: &str, name: &str, counts: &HashMap<&str, usize>) -> String {
    if counts.get(name).copied().unwrap_or(0) > 1 {
        format!("{}{}{}", target, NAMESPACE_SEPARATOR, name)
    } else {
        name.to_string()
    }
}

fn prefix_description(target: &str, description: Option<&str>) -> String {
    match description {
        Some(description) => format!("[{}] {}", target, description),
        None => format!("[{}]", target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> McpTool {
        McpTool {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: json!({"type": "object"}),
        }
    }

    fn listing(target: &str, tools: Vec<McpTool>) -> TargetListing {
        TargetListing {
            target: target.to_string(),
            tools,
            ..Default::default()
        }
    }

    #[test]
    fn test_unique_names_exposed_bare() {
        let table = RoutingTable::build(vec![
            listing("files", vec![tool("read_file", "Read a file")]),
            listing("github", vec![tool("create_issue", "Create an issue")]),
        ]);

        assert_eq!(table.tools.len(), 2);
        assert_eq!(table.tools[0].name, "create_issue");
        assert_eq!(table.tools[1].name, "read_file");

        let route = table.route_tool("read_file").unwrap();
        assert_eq!(route.target, "files");
        assert_eq!(route.original_name, "read_file");
    }

    #[test]
    fn test_colliding_names_all_namespaced() {
        let table = RoutingTable::build(vec![
            listing("github", vec![tool("search", "Search repos")]),
            listing("jira", vec![tool("search", "Search issues")]),
        ]);

        // Neither target gets the bare name; both entries stay routable
        assert!(table.route_tool("search").is_none());

        let github = table.route_tool("github__search").unwrap();
        assert_eq!(github.target, "github");
        assert_eq!(github.original_name, "search");

        let jira = table.route_tool("jira__search").unwrap();
        assert_eq!(jira.target, "jira");
        assert_eq!(jira.original_name, "search");

        let names: Vec<&str> = table.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["github__search", "jira__search"]);
    }

    #[test]
    fn test_collision_does_not_namespace_unrelated_tools() {
        let table = RoutingTable::build(vec![
            listing("github", vec![tool("search", "Search"), tool("fork", "Fork")]),
            listing("jira", vec![tool("search", "Search")]),
        ]);

        // fork is unique, so it stays bare even though search collided
        assert!(table.route_tool("fork").is_some());
        assert!(table.route_tool("github__fork").is_none());
    }

    #[test]
    fn test_descriptions_always_carry_target_prefix() {
        let table = RoutingTable::build(vec![listing(
            "files",
            vec![tool("read_file", "Read a file")],
        )]);

        assert_eq!(
            table.tools[0].description.as_deref(),
            Some("[files] Read a file")
        );
    }

    #[test]
    fn test_resource_uri_collision_first_target_wins() {
        let resource = McpResource {
            uri: "file:///tmp/notes.txt".to_string(),
            name: "notes".to_string(),
            description: None,
            mime_type: Some("text/plain".to_string()),
        };

        let table = RoutingTable::build(vec![
            TargetListing {
                target: "alpha".to_string(),
                resources: vec![resource.clone()],
                ..Default::default()
            },
            TargetListing {
                target: "beta".to_string(),
                resources: vec![resource],
                ..Default::default()
            },
        ]);

        assert_eq!(table.resources.len(), 1);
        assert_eq!(table.route_resource("file:///tmp/notes.txt"), Some("alpha"));
    }

    #[test]
    fn test_prompt_collisions_namespaced() {
        let prompt = |name: &str| McpPrompt {
            name: name.to_string(),
            description: None,
            arguments: None,
        };

        let table = RoutingTable::build(vec![
            TargetListing {
                target: "a".to_string(),
                prompts: vec![prompt("summarize")],
                ..Default::default()
            },
            TargetListing {
                target: "b".to_string(),
                prompts: vec![prompt("summarize"), prompt("review")],
                ..Default::default()
            },
        ]);

        assert!(table.route_prompt("a__summarize").is_some());
        assert!(table.route_prompt("b__summarize").is_some());
        assert!(table.route_prompt("review").is_some());
        assert!(table.route_prompt("summarize").is_none());
    }

    #[test]
    fn test_empty_listings() {
        let table = RoutingTable::build(vec![]);
        assert!(table.tools.is_empty());
        assert!(table.route_tool("anything").is_none());
    }
}
