use std::sync::Arc;

mod canned;
mod model;
mod responder;

pub use canned::{CANNED_RESPONDER_ID, CannedReply, CannedResponder};
pub use model::{DEFAULT_MODEL, Model, ModelFamily, default_models};
pub use responder::{
    BoxFuture, HistoryMessage, ReplyRequest, RequestOptions, Responder, ResponderError,
    ResponderResult, Role,
};

pub fn create_responder(responder_id: &str) -> ResponderResult<Arc<dyn Responder>> {
    let responder_id = responder_id.trim();

    match responder_id {
        "" | CANNED_RESPONDER_ID | "demo" => Ok(Arc::new(CannedResponder::new())),
        _ => Err(ResponderError::UnsupportedResponder {
            stage: "create-responder",
            responder_id: responder_id.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_id_selects_canned_responder() {
        let responder = create_responder("  ").expect("default responder");
        assert_eq!(responder.id(), CANNED_RESPONDER_ID);
    }

    #[test]
    fn unknown_id_is_rejected() {
        let error = create_responder("remote-gpu").err().expect("unsupported");
        assert!(matches!(
            error,
            ResponderError::UnsupportedResponder { ref responder_id, .. } if responder_id == "remote-gpu"
        ));
    }
}
