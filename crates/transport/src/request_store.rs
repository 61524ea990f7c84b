use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::requests::RequestBody;
use crate::responses::Response;
use crate::types::Seq;

/// A request waiting for its response, with the channel to deliver it on
pub(crate) struct WaitingRequest(pub(crate) RequestBody, pub(crate) oneshot::Sender<Response>);

pub(crate) type RequestStore = Arc<Mutex<HashMap<Seq, WaitingRequest>>>;
