use std::sync::Arc;

use crate::push::PushEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PushEngine>,
}
