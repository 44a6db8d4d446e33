//! Chat modes and their handlers.
//!
//! Each mode is served by its own handler that only holds the collaborators
//! it needs; [`ModeRouter`] dispatches on [`ChatMode`].

pub mod accounts;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{RagError, Stage};
use crate::models::Message;
use crate::proxy::CompletionClient;
use crate::rag::RetrievalPipeline;
use crate::session::Session;

use self::accounts::find_account;

pub const CLIENT_SYSTEM_PROMPT: &str = "You are a helpful financial assistant.";
pub const AGENT_SYSTEM_PROMPT: &str = "You are a customer service expert.";
pub const LOGIN_FOR_STATEMENT: &str = "Please log in to access your account statement.";
pub const LOGIN_FOR_HISTORY: &str = "Please log in as a client to view their interaction history.";
pub const UPLOAD_FIRST: &str = "Please upload and process a document first.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatMode {
    Client,
    AgentAssist,
    RagQa,
    Playground,
}

impl ChatMode {
    pub const ALL: [ChatMode; 4] = [
        ChatMode::Client,
        ChatMode::AgentAssist,
        ChatMode::RagQa,
        ChatMode::Playground,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ChatMode::Client => "Client",
            ChatMode::AgentAssist => "Agent Assist",
            ChatMode::RagQa => "RAG Q&A",
            ChatMode::Playground => "ChatGPT API",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ChatMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client" => Ok(ChatMode::Client),
            "agent assist" | "agent-assist" => Ok(ChatMode::AgentAssist),
            "rag q&a" | "rag-qa" | "rag" => Ok(ChatMode::RagQa),
            "chatgpt api" | "playground" => Ok(ChatMode::Playground),
            _ => Err(ModeError::UnknownMode(s.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum ModeError {
    #[error("unknown chat mode: {0}")]
    UnknownMode(String),

    #[error("a message is required in {0} mode")]
    MissingMessage(ChatMode),

    #[error(transparent)]
    Rag(#[from] RagError),
}

async fn complete(completion: &dyn CompletionClient, messages: Vec<Message>) -> Result<String, ModeError> {
    completion
        .complete(messages)
        .await
        .map_err(|e| RagError::external(Stage::Completion, format!("{:#}", e)).into())
}

fn require(mode: ChatMode, message: Option<&str>) -> Result<&str, ModeError> {
    match message.map(str::trim) {
        Some(m) if !m.is_empty() => Ok(m),
        _ => Err(ModeError::MissingMessage(mode)),
    }
}

/// Client self-service: statement lookups, otherwise a general assistant.
pub struct ClientHandler {
    completion: Arc<dyn CompletionClient>,
}

impl ClientHandler {
    pub async fn handle(&self, session: &mut Session, query: &str) -> Result<String, ModeError> {
        let reply = if query.to_lowercase().contains("statement") {
            match session.account().and_then(find_account) {
                Some(account) => format!(
                    "Here’s your latest statement: [Download PDF]({})",
                    account.statement_url
                ),
                None => LOGIN_FOR_STATEMENT.to_string(),
            }
        } else {
            let messages = vec![Message::system(CLIENT_SYSTEM_PROMPT), Message::user(query)];
            complete(self.completion.as_ref(), messages).await?
        };

        // A failed turn leaves no trace in the transcript
        session.messages.push(Message::user(query));
        session.messages.push(Message::assistant(reply.clone()));
        Ok(reply)
    }
}

/// Summarises the selected client's history and drafts a reply for the agent.
pub struct AgentAssistHandler {
    completion: Arc<dyn CompletionClient>,
}

pub fn agent_summary_prompt(history: &[&str]) -> String {
    format!(
        "Summarize this client history and suggest a professional, empathetic response:\n{}",
        history.join("\n")
    )
}

impl AgentAssistHandler {
    pub async fn handle(&self, session: &Session) -> Result<String, ModeError> {
        let Some(account) = session.account().and_then(find_account) else {
            return Ok(LOGIN_FOR_HISTORY.to_string());
        };

        tracing::info!("Summarizing {} history entries for {}", account.history.len(), account.name);
        let messages = vec![
            Message::system(AGENT_SYSTEM_PROMPT),
            Message::user(agent_summary_prompt(account.history)),
        ];
        complete(self.completion.as_ref(), messages).await
    }
}

/// Questions against the session's uploaded document.
pub struct RagQaHandler {
    pipeline: Arc<RetrievalPipeline>,
}

impl RagQaHandler {
    pub async fn handle(&self, session: &Session, question: &str) -> Result<String, ModeError> {
        match self.pipeline.answer(session, question).await {
            Ok(answer) => Ok(answer),
            Err(RagError::NotIndexed) => Ok(UPLOAD_FIRST.to_string()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Raw chat with the model over the playground transcript.
pub struct PlaygroundHandler {
    completion: Arc<dyn CompletionClient>,
}

impl PlaygroundHandler {
    pub async fn handle(&self, session: &mut Session, input: &str) -> Result<String, ModeError> {
        let mut messages = session.playground_messages.clone();
        messages.push(Message::user(input));

        let answer = complete(self.completion.as_ref(), messages.clone()).await?;

        messages.push(Message::assistant(answer.clone()));
        session.playground_messages = messages;
        Ok(answer)
    }
}

pub struct ModeRouter {
    client: ClientHandler,
    agent_assist: AgentAssistHandler,
    rag_qa: RagQaHandler,
    playground: PlaygroundHandler,
}

impl ModeRouter {
    pub fn new(completion: Arc<dyn CompletionClient>, pipeline: Arc<RetrievalPipeline>) -> Self {
        Self {
            client: ClientHandler { completion: completion.clone() },
            agent_assist: AgentAssistHandler { completion: completion.clone() },
            rag_qa: RagQaHandler { pipeline },
            playground: PlaygroundHandler { completion },
        }
    }

    pub async fn handle(
        &self,
        mode: ChatMode,
        session: &mut Session,
        message: Option<&str>,
    ) -> Result<String, ModeError> {
        tracing::debug!("Handling {} request for session {}", mode, session.id());
        match mode {
            ChatMode::Client => self.client.handle(session, require(mode, message)?).await,
            ChatMode::AgentAssist => self.agent_assist.handle(session).await,
            ChatMode::RagQa => self.rag_qa.handle(session, require(mode, message)?).await,
            ChatMode::Playground => self.playground.handle(session, require(mode, message)?).await,
        }
    }
}
