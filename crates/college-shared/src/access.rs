//! Access-control evaluator.
//!
//! A pure function of the caller's identity and the relevant slice of
//! already-loaded resource state. Nothing here performs I/O or caches
//! decisions; callers load the resource fresh and ask again on every
//! operation.
//!
//! The rules are deliberately asymmetric:
//! - dataset **visibility** is broad (owner, any teacher, any admin);
//! - dataset **mutation** is narrow (the exact owner, regardless of role);
//! - saved-chat transcripts additionally need an explicit per-dataset grant
//!   unless the caller is an admin.

use std::fmt;

use serde::Serialize;

use crate::types::{Identity, Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DatasetAction {
    Read,
    Ask,
    Edit,
    Delete,
    Reindex,
}

impl DatasetAction {
    pub fn is_write(&self) -> bool {
        match self {
            DatasetAction::Read | DatasetAction::Ask => false,
            DatasetAction::Edit | DatasetAction::Delete | DatasetAction::Reindex => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TopicAction {
    AddStudents,
    RemoveStudent,
    ViewRoster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChatAction {
    Create,
    Read,
    List,
    Download,
    Update,
    Delete,
}

impl ChatAction {
    fn requires_authorship(&self) -> bool {
        matches!(self, ChatAction::Update | ChatAction::Delete)
    }
}

/// What the caller wants to do, together with the resource facts the
/// decision depends on.
#[derive(Debug, Clone, Copy)]
pub enum AccessRequest<'a> {
    Dataset {
        owner: &'a UserId,
        action: DatasetAction,
    },
    CreateTopic,
    ListAllTopics,
    SearchDirectory,
    Topic {
        creator: &'a UserId,
        action: TopicAction,
    },
    /// `has_grant` is whether the caller holds a `DatasetPermission` for the
    /// chat's dataset. `author` is the chat's creator, absent for `Create`
    /// and `List`.
    Chat {
        has_grant: bool,
        author: Option<&'a UserId>,
        action: ChatAction,
    },
    ManagePermissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotOwner,
    StaffOnly,
    NotTopicCreator,
    NoDatasetGrant,
    NotChatAuthor,
    AdminOnly,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DenyReason::NotOwner => "only the dataset owner may do this",
            DenyReason::StaffOnly => "teacher or admin role required",
            DenyReason::NotTopicCreator => "only the topic creator may do this",
            DenyReason::NoDatasetGrant => "no permission grant for this dataset",
            DenyReason::NotChatAuthor => "only the chat creator or an admin may do this",
            DenyReason::AdminOnly => "admin role required",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    fn from_bool(allowed: bool, reason: DenyReason) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny(reason)
        }
    }
}

/// Decide whether `actor` may perform `request`.
pub fn evaluate(actor: &Identity, request: &AccessRequest<'_>) -> Decision {
    match *request {
        AccessRequest::Dataset { owner, action } => {
            let is_owner = actor.id == *owner;
            if action.is_write() {
                Decision::from_bool(is_owner, DenyReason::NotOwner)
            } else {
                Decision::from_bool(is_owner || actor.role.is_staff(), DenyReason::NotOwner)
            }
        }
        AccessRequest::CreateTopic
        | AccessRequest::ListAllTopics
        | AccessRequest::SearchDirectory => {
            Decision::from_bool(actor.role.is_staff(), DenyReason::StaffOnly)
        }
        AccessRequest::Topic { creator, action } => {
            let is_creator = actor.id == *creator;
            let allowed = match action {
                TopicAction::AddStudents | TopicAction::ViewRoster => is_creator,
                TopicAction::RemoveStudent => is_creator || actor.role == Role::Admin,
            };
            Decision::from_bool(allowed, DenyReason::NotTopicCreator)
        }
        AccessRequest::Chat {
            has_grant,
            author,
            action,
        } => evaluate_chat(actor, has_grant, author, action),
        AccessRequest::ManagePermissions => {
            Decision::from_bool(actor.role == Role::Admin, DenyReason::AdminOnly)
        }
    }
}

fn evaluate_chat(
    actor: &Identity,
    has_grant: bool,
    author: Option<&UserId>,
    action: ChatAction,
) -> Decision {
    let transcript_access = match actor.role {
        Role::Student => return Decision::Deny(DenyReason::StaffOnly),
        Role::Admin => true,
        Role::Teacher => has_grant,
    };
    if !transcript_access {
        return Decision::Deny(DenyReason::NoDatasetGrant);
    }

    if action.requires_authorship() {
        let is_author = author.is_some_and(|a| *a == actor.id);
        return Decision::from_bool(
            is_author || actor.role == Role::Admin,
            DenyReason::NotChatAuthor,
        );
    }

    Decision::Allow
}
