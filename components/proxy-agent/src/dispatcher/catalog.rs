//! Static tool catalog.
//!
//! The catalog is compiled in and exposed verbatim on every list-tools
//! request, regardless of connection state, so the front-side client never
//! sees its tool set shrink mid-session when the upstream drops. Per-tool
//! routing is a tagged dispatch over three cases.

// External crates
use serde_json::{Value, json};

/// How the Dispatcher serves a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRoute {
    /// Served from the local read path; works offline.
    CacheableRead,
    /// Applied locally, then forwarded or queued for replay.
    Write,
    /// Forwarded verbatim; requires Connected.
    PassThrough,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub route: ToolRoute,
}

pub const CATALOG: &[ToolDescriptor] = &[
    ToolDescriptor {
        name: "get_workflow",
        description: "Fetch a workflow document by name, served from the local cache when offline",
        route: ToolRoute::CacheableRead,
    },
    ToolDescriptor {
        name: "get_document",
        description: "Fetch a document of any type by (docType, name, project)",
        route: ToolRoute::CacheableRead,
    },
    ToolDescriptor {
        name: "get_memory",
        description: "Fetch a stored memory by (name, project)",
        route: ToolRoute::CacheableRead,
    },
    ToolDescriptor {
        name: "create_document",
        description: "Create a document; queued for sync when the upstream is unreachable",
        route: ToolRoute::Write,
    },
    ToolDescriptor {
        name: "update_document",
        description: "Update a document; queued for sync when the upstream is unreachable",
        route: ToolRoute::Write,
    },
    ToolDescriptor {
        name: "set_memory",
        description: "Create or overwrite a memory; queued for sync when the upstream is unreachable",
        route: ToolRoute::Write,
    },
    ToolDescriptor {
        name: "update_memory",
        description: "Update a memory; queued for sync when the upstream is unreachable",
        route: ToolRoute::Write,
    },
    ToolDescriptor {
        name: "delete_document",
        description: "Delete a document locally and upstream",
        route: ToolRoute::Write,
    },
    ToolDescriptor {
        name: "delete_memory",
        description: "Delete a memory locally and upstream",
        route: ToolRoute::Write,
    },
    ToolDescriptor {
        name: "search_codebase",
        description: "Search the indexed codebase; requires a live upstream connection",
        route: ToolRoute::PassThrough,
    },
    ToolDescriptor {
        name: "list_documents",
        description: "List documents of a given type; requires a live upstream connection",
        route: ToolRoute::PassThrough,
    },
    ToolDescriptor {
        name: "list_memories",
        description: "List stored memories; requires a live upstream connection",
        route: ToolRoute::PassThrough,
    },
];

pub fn descriptor(name: &str) -> Option<&'static ToolDescriptor> {
    CATALOG.iter().find(|tool| tool.name == name)
}

/// Tools absent from the catalog are still forwarded: unknown names route
/// as pass-through so the upstream stays the authority on its own surface.
pub fn route_for(name: &str) -> ToolRoute {
    descriptor(name).map_or(ToolRoute::PassThrough, |tool| tool.route)
}

/// JSON schema for a tool's arguments, served with the catalog.
pub fn input_schema(name: &str) -> Value {
    let string = |desc: &str| json!({"type": "string", "description": desc});
    let project = string("Project scope; empty or omitted means global");
    let metadata = json!({"type": "object", "description": "Opaque metadata map"});

    match name {
        "get_workflow" => json!({
            "type": "object",
            "properties": {"name": string("Workflow name"), "project": project},
            "required": ["name"],
        }),
        "get_document" => json!({
            "type": "object",
            "properties": {
                "docType": string("Document type, e.g. workflow, rule, frd"),
                "name": string("Document name"),
                "project": project,
            },
            "required": ["docType", "name"],
        }),
        "get_memory" | "delete_memory" => json!({
            "type": "object",
            "properties": {"name": string("Memory name"), "project": project},
            "required": ["name"],
        }),
        "create_document" | "update_document" => json!({
            "type": "object",
            "properties": {
                "docType": string("Document type"),
                "name": string("Document name"),
                "content": string("Document body"),
                "project": project,
                "metadata": metadata,
            },
            "required": ["docType", "name", "content"],
        }),
        "set_memory" | "update_memory" => json!({
            "type": "object",
            "properties": {
                "name": string("Memory name"),
                "content": string("Memory body"),
                "project": project,
                "metadata": metadata,
            },
            "required": ["name", "content"],
        }),
        "delete_document" => json!({
            "type": "object",
            "properties": {
                "docType": string("Document type"),
                "name": string("Document name"),
                "project": project,
            },
            "required": ["docType", "name"],
        }),
        _ => json!({"type": "object", "additionalProperties": true}),
    }
}

/// The catalog in list-tools wire form.
pub fn catalog_json() -> Value {
    let tools: Vec<Value> = CATALOG
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": input_schema(tool.name),
            })
        })
        .collect();
    json!({ "tools": tools })
}
