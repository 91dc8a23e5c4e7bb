use std::sync::Arc;

use lucid_core::{EntryId, KbError, Session, SessionError};
use lucid_store::KbStore;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct LucidServer {
    session: Arc<Session>,
    /// Held across a write and its persistence so the store sees writes in
    /// commit order. Queries never take it.
    state: Arc<Mutex<ServerState>>,
    tool_router: ToolRouter<Self>,
}

struct ServerState {
    store: KbStore,
}

impl LucidServer {
    pub fn new(store: KbStore, session: Session) -> Self {
        Self {
            session: Arc::new(session),
            state: Arc::new(Mutex::new(ServerState { store })),
            tool_router: Self::tool_router(),
        }
    }

    /// Flush the WAL so a clean exit leaves a single database file.
    pub async fn checkpoint_wal(&self) {
        let state = self.state.lock().await;
        if let Err(e) = state.store.store().checkpoint_truncate() {
            tracing::warn!("WAL checkpoint failed: {e}");
            return;
        }
        tracing::info!("WAL checkpoint complete");
    }

    fn persist(&self, state: &ServerState) -> Result<(), McpError> {
        state
            .store
            .sync_log(&self.session.log())
            .map_err(|e| McpError::internal_error(format!("failed to persist: {e}"), None))?;
        Ok(())
    }
}

/// Compile and input errors go back to the client as invalid params with
/// the structured error attached; everything else is internal.
fn session_error(e: SessionError) -> McpError {
    match &e {
        SessionError::Compile { index, error } => McpError::invalid_params(
            e.to_string(),
            Some(serde_json::json!({
                "statement": index,
                "error": error,
            })),
        ),
        SessionError::NotAnAssertion { .. }
        | SessionError::NotAQuestion
        | SessionError::Kb(KbError::NotFound(_)) => McpError::invalid_params(e.to_string(), None),
        SessionError::Kb(_) | SessionError::Inference(_) => {
            McpError::internal_error(e.to_string(), None)
        }
    }
}

fn json_result(value: &serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )])
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct AssertRequest {
    /// One or more statements, e.g. "Every farmer who owns a donkey beats it."
    text: String,
    /// Where the text came from, recorded as provenance. Defaults to "mcp".
    source: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RetractRequest {
    /// Entry id returned by kb_assert or kb_list
    id: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct QueryRequest {
    /// A single question, e.g. "Who beats a donkey?"
    text: String,
    /// Include a step-by-step explanation citing the entries used
    explain: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListRequest {
    /// Include retracted entries
    all: Option<bool>,
}

#[tool_router]
impl LucidServer {
    #[tool(
        description = "Assert statements into the knowledge base. Statements are compiled in order and may refer back to earlier ones with pronouns and definite descriptions. Returns one outcome per statement: the entry id, whether it was new, contradiction warnings and violated denials. A statement that fails to compile stops the run; earlier statements stay asserted."
    )]
    async fn kb_assert(
        &self,
        Parameters(req): Parameters<AssertRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let source = req.source.as_deref().unwrap_or("mcp");
        let result = self.session.assert(&req.text, source);
        self.persist(&state)?;

        let outcomes = result.map_err(session_error)?;
        Ok(json_result(&serde_json::json!({
            "outcomes": outcomes,
            "stats": self.session.stats(),
        })))
    }

    #[tool(description = "Retract an entry by id. Answers no longer use it; the id is never reused.")]
    async fn kb_retract(
        &self,
        Parameters(req): Parameters<RetractRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        self.session
            .retract(EntryId(req.id))
            .map_err(session_error)?;
        self.persist(&state)?;

        Ok(json_result(&serde_json::json!({
            "retracted": req.id,
            "stats": self.session.stats(),
        })))
    }

    #[tool(
        description = "Ask a question in controlled English: yes/no (\"Does Tom own a car?\"), wh- (\"Who owns a car?\") or counting (\"How many cars does Tom own?\"). Answers are closed-world: what cannot be proved is false. When the inference budget runs out the answer is \"unknown\" with the reason."
    )]
    async fn kb_query(
        &self,
        Parameters(req): Parameters<QueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let answer = match crate::ask(&self.session, &req.text).await {
            Ok(answer) => answer,
            Err(SessionError::Inference(e)) => {
                return Ok(json_result(&serde_json::json!({
                    "answer": "unknown",
                    "reason": e.to_string(),
                })));
            }
            Err(e) => return Err(session_error(e)),
        };

        let mut json = serde_json::json!({
            "answer": answer.to_string(),
            "kind": answer.kind,
            "cited": answer.cited(),
        });
        if req.explain.unwrap_or(false) {
            let explanation = self.session.explain(&answer);
            json["explanation"] = serde_json::json!({
                "text": explanation.to_string(),
                "proofs": explanation.proofs,
            });
        }
        Ok(json_result(&json))
    }

    #[tool(description = "Knowledge base statistics: entries, facts, rules, denials, individuals.")]
    async fn kb_stats(&self) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let mut json = serde_json::json!(self.session.stats());
        json["kb"] = serde_json::json!(state.store.name());
        Ok(json_result(&json))
    }

    #[tool(description = "List entries in id order with their source sentence, provenance and compiled form.")]
    async fn kb_list(
        &self,
        Parameters(req): Parameters<ListRequest>,
    ) -> Result<CallToolResult, McpError> {
        let entries: Vec<serde_json::Value> = self
            .session
            .entries(req.all.unwrap_or(false))
            .into_iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "active": r.active,
                    "source": r.provenance.source,
                    "position": r.provenance.position,
                    "text": r.provenance.text,
                    "offset": r.provenance.offset,
                    "drs": r.drs.to_string(),
                })
            })
            .collect();
        Ok(json_result(&serde_json::json!({ "entries": entries })))
    }
}

#[tool_handler]
impl ServerHandler for LucidServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "A knowledge base written in controlled English.\n\n\
                 - kb_assert adds statements such as \"Every student reads a book.\" or \
                   \"Tom is a student.\". Pronouns refer back to earlier statements.\n\
                 - kb_query answers questions by backward chaining over what was asserted. \
                   Anything that cannot be proved counts as false. Pass explain=true to get \
                   the proof and the entries it used.\n\
                 - kb_retract removes an entry; kb_list and kb_stats show what is stored.\n\n\
                 Words outside the vocabulary are rejected with the position of the unknown word."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
