//! Marketplace Services - the booking, review, and messaging core.
//!
//! This crate provides:
//! - Session lifecycle (explicit session objects, sign-in/sign-out handling)
//! - BookingLifecycle (role-checked transitions with conditioned writes)
//! - ReviewGate (one review per completed booking)
//! - MessageService (send, thread reads, mark-read)
//! - Conversation aggregation and the conversation-list view
//! - ChatView (live thread with read tracking)
//! - Event bus (typed intra-service communication)
//! - User-facing outcome messages for every error kind

pub mod event_bus;
pub mod session;
pub mod booking;
pub mod review;
pub mod message;
pub mod conversation;
pub mod chat;
pub mod outcome;
pub mod registry;

// Re-export key types
pub use event_bus::{AppEvent, EventBus};
pub use session::{AuthChange, Session, SessionManager};
pub use booking::{ActorRole, BookingBuckets, BookingDraft, BookingLifecycle, TransitionRequest};
pub use review::{ReviewEligibility, ReviewGate};
pub use message::MessageService;
pub use conversation::{aggregate, Conversation, ConversationList, ConversationListView};
pub use chat::ChatView;
pub use registry::ServiceRegistry;
