//! V1 API handlers.

mod sessions;

pub use sessions::{
    chat_info, close_session, create_session, get_session, get_session_status, list_sessions,
};
