use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    schemars,
};
use serde::Deserialize;

use notegraph::{ActionResponse, Note, NoteId, NoteService, ScoredNote};

const DEFAULT_LIST_K: usize = 20;
const DEFAULT_SNIPPET_CHARS: usize = 140;

/// Input for capturing a note.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateNoteInput {
    #[schemars(description = "Note text")]
    pub content: String,
}

/// Input for listing notes.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListNotesInput {
    #[schemars(description = "Number of notes to return, newest first (default: 20)")]
    pub limit: Option<usize>,
    #[schemars(description = "Maximum characters per snippet (default: 140)")]
    pub snippet_chars: Option<usize>,
}

/// Input for semantic search.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchNotesInput {
    #[schemars(description = "Text query")]
    pub query: String,
    #[schemars(description = "Number of rows to return (default: 5)")]
    pub limit: Option<usize>,
    #[schemars(description = "Optional minimum similarity, stricter than the server default")]
    pub min_score: Option<f32>,
    #[schemars(description = "Maximum characters per snippet (default: 140)")]
    pub snippet_chars: Option<usize>,
}

/// Input for tools addressing one note.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NoteIdInput {
    #[schemars(description = "Note id")]
    pub note_id: NoteId,
}

/// Input for replacing a note's content.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UpdateNoteInput {
    #[schemars(description = "Note id")]
    pub note_id: NoteId,
    #[schemars(description = "New note text")]
    pub content: String,
}

/// Input for related-note lookup.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RelatedNotesInput {
    #[schemars(description = "Note id")]
    pub note_id: NoteId,
    #[schemars(description = "Number of related notes to return (default: 5)")]
    pub limit: Option<usize>,
}

/// Input for graph export.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GraphDataInput {
    #[schemars(description = "Return the full graph as JSON instead of a markdown summary")]
    pub json: Option<bool>,
}

/// MCP server exposing note capture, search and graph tools over one note store.
#[derive(Debug, Clone)]
pub struct NotegraphMcpServer {
    service: Arc<NoteService>,
    pub tool_router: ToolRouter<Self>,
}

#[rmcp::tool_router]
impl NotegraphMcpServer {
    /// Construct a server over `service`.
    pub fn new(service: Arc<NoteService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    /// Capture a new note.
    #[rmcp::tool(description = "Create a note from text; it is embedded and indexed immediately")]
    async fn create_note(&self, Parameters(input): Parameters<CreateNoteInput>) -> String {
        self.run(move |svc| Self::create_note_impl(svc, input)).await
    }

    /// List notes newest first.
    #[rmcp::tool(description = "List notes newest first as a compact markdown table")]
    async fn list_notes(&self, Parameters(input): Parameters<ListNotesInput>) -> String {
        self.run(move |svc| Self::list_notes_impl(svc, input)).await
    }

    /// Semantic search.
    #[rmcp::tool(description = "Semantic search over notes; returns token-efficient markdown results")]
    async fn search_notes(&self, Parameters(input): Parameters<SearchNotesInput>) -> String {
        self.run(move |svc| Self::search_notes_impl(svc, input)).await
    }

    /// Show one note in full.
    #[rmcp::tool(description = "Return one note by id with its full content")]
    async fn get_note(&self, Parameters(input): Parameters<NoteIdInput>) -> String {
        self.run(move |svc| Self::get_note_impl(svc, input)).await
    }

    /// Replace a note's content.
    #[rmcp::tool(description = "Replace the content of a note and re-embed it")]
    async fn update_note(&self, Parameters(input): Parameters<UpdateNoteInput>) -> String {
        self.run(move |svc| Self::update_note_impl(svc, input)).await
    }

    /// Delete a note.
    #[rmcp::tool(description = "Delete a note by id")]
    async fn delete_note(&self, Parameters(input): Parameters<NoteIdInput>) -> String {
        self.run(move |svc| Self::delete_note_impl(svc, input)).await
    }

    /// Relationship graph.
    #[rmcp::tool(
        description = "Return the note relationship graph (each note linked to its nearest neighbours)"
    )]
    async fn graph_data(&self, Parameters(input): Parameters<GraphDataInput>) -> String {
        self.run(move |svc| Self::graph_data_impl(svc, input)).await
    }

    /// Notes similar to a given one.
    #[rmcp::tool(description = "List the notes most similar to a given note")]
    async fn related_notes(&self, Parameters(input): Parameters<RelatedNotesInput>) -> String {
        self.run(move |svc| Self::related_notes_impl(svc, input)).await
    }
}

impl NotegraphMcpServer {
    /// Run a blocking service call off the async workers and render its outcome.
    async fn run<F>(&self, f: F) -> String
    where
        F: FnOnce(&NoteService) -> anyhow::Result<String> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        match tokio::task::spawn_blocking(move || f(&service)).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => format!("Error: {err:#}"),
            Err(err) => format!("Error: tool task failed: {err}"),
        }
    }

    fn clamp_k(k: Option<usize>, default_k: usize, max_k: usize) -> usize {
        k.unwrap_or(default_k).clamp(1, max_k)
    }

    fn snippet_chars(chars: Option<usize>) -> usize {
        chars.unwrap_or(DEFAULT_SNIPPET_CHARS).clamp(40, 300)
    }

    fn cell(note: &Note, max_chars: usize) -> String {
        note.preview(max_chars).replace('|', "\\|")
    }

    fn scored_table(out: &mut String, hits: &[ScoredNote], snippet_chars: usize) {
        out.push_str("| # | note_id | score | snippet |\n");
        out.push_str("|---|---------|-------|---------|\n");
        for hit in hits {
            out.push_str(&format!(
                "| {} | {} | {:.4} | {} |\n",
                hit.rank,
                hit.note.id,
                hit.similarity,
                Self::cell(&hit.note, snippet_chars)
            ));
        }
    }

    fn create_note_impl(service: &NoteService, input: CreateNoteInput) -> anyhow::Result<String> {
        let note = service.create_note(&input.content)?;
        Ok(format!("Created note {}.\n", note.id))
    }

    fn list_notes_impl(service: &NoteService, input: ListNotesInput) -> anyhow::Result<String> {
        let limit = Self::clamp_k(input.limit, DEFAULT_LIST_K, 200);
        let snippet_chars = Self::snippet_chars(input.snippet_chars);
        let notes = service.get_notes();

        let mut out = String::new();
        out.push_str("# Notes\n");
        out.push_str(&format!("- total: {}\n\n", notes.len()));
        if notes.is_empty() {
            return Ok(out);
        }
        out.push_str("| note_id | created_at | snippet |\n");
        out.push_str("|---------|------------|---------|\n");
        for note in notes.iter().take(limit) {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                note.id,
                note.created_at.format("%Y-%m-%d %H:%M"),
                Self::cell(note, snippet_chars)
            ));
        }
        Ok(out)
    }

    fn search_notes_impl(service: &NoteService, input: SearchNotesInput) -> anyhow::Result<String> {
        let limit = Self::clamp_k(input.limit, service.config().search.default_limit, 50);
        let snippet_chars = Self::snippet_chars(input.snippet_chars);

        let mut hits = service.search_notes(&input.query, Some(limit))?;
        if let Some(min_score) = input.min_score {
            hits.retain(|h| h.similarity >= min_score);
        }

        let mut out = String::new();
        out.push_str(&format!("# Query: `{}`\n", input.query));
        out.push_str(&format!("- hits: {}\n\n", hits.len()));
        if !hits.is_empty() {
            Self::scored_table(&mut out, &hits, snippet_chars);
        }
        Ok(out)
    }

    fn get_note_impl(service: &NoteService, input: NoteIdInput) -> anyhow::Result<String> {
        let note = service.get_note(input.note_id)?;
        let mut out = String::new();
        out.push_str(&format!("# Note {}\n", note.id));
        out.push_str(&format!("- created_at: {}\n", note.created_at.to_rfc3339()));
        if let Some(updated) = note.updated_at {
            out.push_str(&format!("- updated_at: {}\n", updated.to_rfc3339()));
        }
        out.push_str(&format!(
            "- embedded: {}\n\n",
            note.valid_embedding(service.store().dimension()).is_some()
        ));
        out.push_str(&note.content);
        out.push('\n');
        Ok(out)
    }

    fn update_note_impl(service: &NoteService, input: UpdateNoteInput) -> anyhow::Result<String> {
        let note = service.update_note(input.note_id, &input.content)?;
        Ok(format!("Updated note {}.\n", note.id))
    }

    fn delete_note_impl(service: &NoteService, input: NoteIdInput) -> anyhow::Result<String> {
        service.delete_note(input.note_id)?;
        Ok(format!("Deleted note {}.\n", input.note_id))
    }

    fn graph_data_impl(service: &NoteService, input: GraphDataInput) -> anyhow::Result<String> {
        let graph = service.get_graph_data();
        if input.json.unwrap_or(false) {
            return Ok(serde_json::to_string(&ActionResponse::ok(graph))?);
        }

        let mut out = String::new();
        out.push_str("# Note Graph\n");
        out.push_str(&format!("- nodes: {}\n", graph.nodes.len()));
        out.push_str(&format!("- edges: {}\n", graph.edges.len()));
        out.push_str(&format!("- k: {}\n\n", service.config().graph.k));
        if graph.edges.is_empty() {
            return Ok(out);
        }
        out.push_str("| source | target | similarity |\n");
        out.push_str("|--------|--------|------------|\n");
        for edge in &graph.edges {
            out.push_str(&format!(
                "| {} | {} | {:.4} |\n",
                edge.source, edge.target, edge.weight
            ));
        }
        Ok(out)
    }

    fn related_notes_impl(service: &NoteService, input: RelatedNotesInput) -> anyhow::Result<String> {
        let limit = Self::clamp_k(input.limit, service.config().search.default_limit, 25);
        let hits = service.get_related_notes(input.note_id, Some(limit))?;

        let mut out = String::new();
        out.push_str(&format!("# Related to note {}\n", input.note_id));
        if hits.is_empty() {
            out.push_str("No related notes.\n");
            return Ok(out);
        }
        out.push('\n');
        Self::scored_table(&mut out, &hits, DEFAULT_SNIPPET_CHARS);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph::{FakeEmbedder, NoteStore, ServiceConfig};

    fn service() -> NoteService {
        let store = NoteStore::in_memory(256).unwrap();
        NoteService::new(store, Arc::new(FakeEmbedder::new(256)), ServiceConfig::default()).unwrap()
    }

    #[test]
    fn search_renders_markdown_table() {
        let svc = service();
        svc.create_note("rust | borrow checker").unwrap();
        svc.create_note("baking bread").unwrap();

        let out = NotegraphMcpServer::search_notes_impl(
            &svc,
            SearchNotesInput {
                query: "borrow checker".to_string(),
                limit: None,
                min_score: None,
                snippet_chars: None,
            },
        )
        .unwrap();
        assert!(out.contains("| 1 | 1 |"));
        assert!(out.contains("rust \\| borrow checker"));
    }

    #[test]
    fn graph_json_is_an_action_response() {
        let svc = service();
        svc.create_note("alpha").unwrap();
        svc.create_note("beta").unwrap();

        let out =
            NotegraphMcpServer::graph_data_impl(&svc, GraphDataInput { json: Some(true) }).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["edges"][0]["source"], 1);
        assert_eq!(value["data"]["edges"][0]["target"], 2);
    }

    #[test]
    fn missing_note_is_reported() {
        let svc = service();
        let err = NotegraphMcpServer::get_note_impl(&svc, NoteIdInput { note_id: 9 }).unwrap_err();
        assert!(err.to_string().contains("note 9 not found"));
    }
}
