//! Saved Q&A transcripts and their Markdown export.
//!
//! Transcripts are scoped more tightly than the dataset they belong to:
//! teachers need an explicit grant for the dataset, admins do not, and
//! students never see them. Update and delete additionally require being
//! the chat's creator (or an admin).

use std::fmt::Write as _;

use chrono::Utc;
use college_shared::constants::MAX_FILENAME_STEM;
use college_shared::{AccessRequest, ChatAction, Identity, Page, PageRequest, Role, UserId};
use college_store::{ChatMessage, Dataset, NewChatMessage, SavedChat};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{authorize, EngineError, NotFoundExt};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct NewChat {
    pub title: String,
    pub messages: Vec<NewChatMessage>,
}

/// A chat with its transcript.
#[derive(Debug, Clone, Serialize)]
pub struct ChatDetail {
    #[serde(flatten)]
    pub chat: SavedChat,
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone)]
pub struct ChatEngine {
    store: Store,
}

impl ChatEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Load the active dataset and decide `action` for `actor`.
    async fn gate(
        &self,
        actor: &Identity,
        dataset_id: Uuid,
        author: Option<&UserId>,
        action: ChatAction,
    ) -> Result<Dataset, EngineError> {
        let dataset = self
            .store
            .call(move |db| db.get_dataset(dataset_id))
            .await
            .or_not_found("dataset")?;

        let has_grant = if actor.role == Role::Teacher {
            let teacher = actor.id.clone();
            self.store
                .call(move |db| db.has_permission(dataset_id, &teacher))
                .await?
        } else {
            false
        };

        authorize(
            actor,
            &AccessRequest::Chat {
                has_grant,
                author,
                action,
            },
        )?;
        Ok(dataset)
    }

    async fn load_chat(&self, id: Uuid) -> Result<SavedChat, EngineError> {
        self.store
            .call(move |db| db.get_chat(id))
            .await
            .or_not_found("chat")
    }

    async fn load_gated(
        &self,
        actor: &Identity,
        id: Uuid,
        action: ChatAction,
    ) -> Result<(SavedChat, Dataset), EngineError> {
        let chat = self.load_chat(id).await?;
        let dataset = self
            .gate(actor, chat.dataset_id, Some(&chat.user_id), action)
            .await?;
        Ok((chat, dataset))
    }

    async fn detail(&self, chat: SavedChat) -> Result<ChatDetail, EngineError> {
        let chat_id = chat.id;
        let messages = self
            .store
            .call(move |db| db.messages_for_chat(chat_id))
            .await?;
        Ok(ChatDetail { chat, messages })
    }

    pub async fn create(
        &self,
        actor: &Identity,
        dataset_id: Uuid,
        req: NewChat,
    ) -> Result<ChatDetail, EngineError> {
        self.gate(actor, dataset_id, None, ChatAction::Create).await?;

        let title = req.title.trim().to_string();
        if title.is_empty() {
            return Err(EngineError::ValidationFailed("title is required".to_string()));
        }

        let now = Utc::now();
        let chat = SavedChat {
            id: Uuid::new_v4(),
            dataset_id,
            title,
            created_by: actor.username.clone(),
            user_id: actor.id.clone(),
            created_at: now,
            updated_at: now,
        };

        let row = chat.clone();
        let messages = req.messages;
        let count = messages.len();
        self.store
            .call(move |db| db.create_chat(&row, &messages))
            .await?;

        info!(chat_id = %chat.id, %dataset_id, user = %actor.id, messages = count, "chat saved");
        self.detail(chat).await
    }

    pub async fn list(
        &self,
        actor: &Identity,
        dataset_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<SavedChat>, EngineError> {
        self.gate(actor, dataset_id, None, ChatAction::List).await?;
        let (offset, limit) = (page.offset(), page.limit);
        let (items, total) = self
            .store
            .call(move |db| db.list_chats_for_dataset(dataset_id, offset, limit))
            .await?;
        Ok(Page::new(items, total, page))
    }

    pub async fn get(&self, actor: &Identity, id: Uuid) -> Result<ChatDetail, EngineError> {
        let (chat, _) = self.load_gated(actor, id, ChatAction::Read).await?;
        self.detail(chat).await
    }

    /// Rename and/or replace the whole transcript. A blank title is ignored.
    pub async fn update(
        &self,
        actor: &Identity,
        id: Uuid,
        title: Option<String>,
        messages: Option<Vec<NewChatMessage>>,
    ) -> Result<ChatDetail, EngineError> {
        self.load_gated(actor, id, ChatAction::Update).await?;

        let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let now = Utc::now();
        self.store
            .call(move |db| db.update_chat(id, title.as_deref(), messages.as_deref(), now))
            .await
            .or_not_found("chat")?;

        info!(chat_id = %id, user = %actor.id, "chat updated");
        let chat = self.load_chat(id).await?;
        self.detail(chat).await
    }

    pub async fn delete(&self, actor: &Identity, id: Uuid) -> Result<(), EngineError> {
        self.load_gated(actor, id, ChatAction::Delete).await?;
        self.store
            .call(move |db| db.delete_chat(id))
            .await
            .or_not_found("chat")?;
        info!(chat_id = %id, user = %actor.id, "chat deleted");
        Ok(())
    }

    /// Render the transcript as Markdown. Returns the bytes and a download
    /// filename derived from the chat title.
    pub async fn download(
        &self,
        actor: &Identity,
        id: Uuid,
    ) -> Result<(Vec<u8>, String), EngineError> {
        let (chat, dataset) = self.load_gated(actor, id, ChatAction::Download).await?;
        let detail = self.detail(chat).await?;
        let body = render_markdown(&detail, &dataset.title);
        Ok((body.into_bytes(), download_filename(&detail.chat.title)))
    }
}

fn render_markdown(detail: &ChatDetail, dataset_title: &str) -> String {
    let chat = &detail.chat;
    let mut out = String::new();
    let _ = write!(
        out,
        "# {}\n\n**Dataset:** {}\n**Author:** {}\n**Created:** {}\n\n---\n\n",
        chat.title,
        dataset_title,
        chat.created_by,
        chat.created_at.format("%Y-%m-%d %H:%M"),
    );
    for (i, msg) in detail.messages.iter().enumerate() {
        let _ = write!(
            out,
            "## Question {}\n\n**Q:** {}\n\n**A:** {}\n\n---\n\n",
            i + 1,
            msg.question,
            msg.answer,
        );
    }
    out
}

fn download_filename(title: &str) -> String {
    let stem: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .take(MAX_FILENAME_STEM)
        .collect();
    if stem.is_empty() {
        "chat.md".to_string()
    } else {
        format!("{stem}.md")
    }
}
