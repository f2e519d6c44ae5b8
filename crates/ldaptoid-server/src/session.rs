//! Per-connection protocol state machine.
//!
//! Sequencing and authorization only; the wire work lives in the codec and
//! the directory work in the search executor. One session per TCP
//! connection, owned by that connection's task.

use std::sync::Arc;

use ldaptoid_proto::dn::normalize;
use ldaptoid_proto::{
    AuthenticationChoice, Control, LdapMessage, LdapResult, ProtocolOp, ResultCode,
};
use ldaptoid_snapshot::Snapshot;
use metrics::counter;
use tracing::{debug, warn};

use crate::search;
use crate::tree::DirectoryTree;

/// Read access to the latest published snapshot. Implemented by the
/// refresh scheduler; tests substitute fixed providers.
pub trait SnapshotProvider: Send + Sync {
    fn current(&self) -> Option<Arc<Snapshot>>;
}

impl SnapshotProvider for ldaptoid_snapshot::RefreshScheduler {
    fn current(&self) -> Option<Arc<Snapshot>> {
        ldaptoid_snapshot::RefreshScheduler::current(self)
    }
}

/// Bind/authorization settings for the listener.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Service-account DN, already in any spelling; compared normalized.
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    /// Permit Search without a prior successful Bind.
    pub allow_anonymous_bind: bool,
    /// Server-side cap on search results.
    pub size_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_dn: None,
            bind_password: None,
            allow_anonymous_bind: false,
            size_limit: search::DEFAULT_SIZE_LIMIT,
        }
    }
}

impl SessionConfig {
    fn service_account(&self) -> Option<(&str, &str)> {
        match (self.bind_dn.as_deref(), self.bind_password.as_deref()) {
            (Some(dn), Some(password)) if !dn.is_empty() => Some((dn, password)),
            _ => None,
        }
    }

    /// Search (and anonymous bind) is open when no service account is
    /// configured or the deployment explicitly allows anonymous access.
    fn anonymous_allowed(&self) -> bool {
        self.allow_anonymous_bind || self.service_account().is_none()
    }
}

/// Protocol state for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindState {
    Unauthenticated,
    Bound(String),
    Closing,
}

/// What the connection task should do after a message is handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Close,
}

pub struct Session {
    config: Arc<SessionConfig>,
    tree: Arc<DirectoryTree>,
    snapshots: Arc<dyn SnapshotProvider>,
    state: BindState,
}

impl Session {
    pub fn new(
        config: Arc<SessionConfig>,
        tree: Arc<DirectoryTree>,
        snapshots: Arc<dyn SnapshotProvider>,
    ) -> Self {
        Self {
            config,
            tree,
            snapshots,
            state: BindState::Unauthenticated,
        }
    }

    pub fn state(&self) -> &BindState {
        &self.state
    }

    /// Advances the state machine by one request, producing the responses
    /// to write back in order.
    pub fn handle(&mut self, message: LdapMessage) -> (Vec<LdapMessage>, Disposition) {
        let message_id = message.message_id;
        match message.op {
            ProtocolOp::BindRequest(request) => {
                let response = self.bind(request.dn, request.auth);
                (
                    vec![LdapMessage::new(message_id, ProtocolOp::BindResponse(response))],
                    Disposition::Continue,
                )
            }
            ProtocolOp::SearchRequest(request) => {
                let responses = self.search(message_id, &request, &message.controls);
                (responses, Disposition::Continue)
            }
            ProtocolOp::UnbindRequest => {
                debug!("unbind, closing connection");
                self.state = BindState::Closing;
                (Vec::new(), Disposition::Close)
            }
            op => {
                warn!(tag = ?op, "unsupported operation");
                (
                    vec![protocol_error(message_id, "operation not supported")],
                    Disposition::Continue,
                )
            }
        }
    }

    fn bind(&mut self, dn: String, auth: AuthenticationChoice) -> LdapResult {
        let password = match auth {
            AuthenticationChoice::Sasl { mechanism } => {
                debug!(%mechanism, "rejecting SASL bind");
                return LdapResult::new(
                    ResultCode::AuthMethodNotSupported,
                    "only simple binds are supported",
                );
            }
            AuthenticationChoice::Simple(password) => password,
        };

        if dn.is_empty() && password.is_empty() {
            return if self.config.anonymous_allowed() {
                self.state = BindState::Bound(String::new());
                LdapResult::success()
            } else {
                LdapResult::new(ResultCode::InsufficientAccessRights, "anonymous bind disabled")
            };
        }

        // One failure code for every flavor of bad credentials: unknown DN,
        // wrong password, and no-service-account all look identical.
        let Some((expected_dn, expected_password)) = self.config.service_account() else {
            return LdapResult::new(ResultCode::InvalidCredentials, "");
        };
        let dn_matches = match (normalize(&dn), normalize(expected_dn)) {
            (Ok(got), Ok(expected)) => got == expected,
            _ => false,
        };
        if dn_matches && constant_time_eq(password.as_bytes(), expected_password.as_bytes()) {
            debug!(%dn, "service account bound");
            self.state = BindState::Bound(dn);
            LdapResult::success()
        } else {
            LdapResult::new(ResultCode::InvalidCredentials, "")
        }
    }

    fn search(
        &mut self,
        message_id: i32,
        request: &ldaptoid_proto::SearchRequest,
        controls: &[Control],
    ) -> Vec<LdapMessage> {
        let authorized = matches!(self.state, BindState::Bound(_)) || self.config.anonymous_allowed();
        if !authorized {
            return vec![search_done(
                message_id,
                LdapResult::new(ResultCode::InsufficientAccessRights, "bind first"),
                false,
            )];
        }

        counter!("ldaptoid_searches_total").increment(1);
        let snapshot = self.snapshots.current();
        let outcome = search::execute(
            request,
            controls,
            snapshot.as_deref(),
            &self.tree,
            self.config.size_limit,
        );

        let mut responses: Vec<LdapMessage> = outcome
            .entries
            .into_iter()
            .map(|entry| LdapMessage::new(message_id, ProtocolOp::SearchResultEntry(entry)))
            .collect();
        responses.push(search_done(
            message_id,
            outcome.result,
            outcome.acknowledge_paging,
        ));
        responses
    }
}

/// The `protocolError` answer used both for unsupported operations and for
/// decode failures with a known message id.
pub fn protocol_error(message_id: i32, message: &str) -> LdapMessage {
    LdapMessage::new(
        message_id,
        ProtocolOp::SearchResultDone(LdapResult::new(ResultCode::ProtocolError, message)),
    )
}

fn search_done(message_id: i32, result: LdapResult, acknowledge_paging: bool) -> LdapMessage {
    let controls = if acknowledge_paging {
        vec![Control::paged_results_ack()]
    } else {
        Vec::new()
    };
    LdapMessage::with_controls(message_id, ProtocolOp::SearchResultDone(result), controls)
}

/// Length-safe comparison that does not bail on the first mismatching
/// byte. Bind timing should not reveal how much of the password matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
