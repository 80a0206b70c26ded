use crate::http::request::ConnectionHint;
use crate::prelude::*;
use crate::server::Server;

impl Server {
    /// Once-per-tick sweep. A connection whose current phase has outlived
    /// its budget gets 408 (still receiving), 504 (gateway active, job
    /// withdrawn), or is closed outright; all three force the connection
    /// shut after the response. Expired sessions ride along.
    pub(crate) fn sweep_timeouts(&mut self) {
        let now = Instant::now();

        let expired: Vec<(Token, Phase)> = self
            .connections
            .iter()
            .filter(|(_, conn)| now.duration_since(conn.phase_since) > conn.timeout_budget())
            .map(|(token, conn)| (*token, conn.phase))
            .collect();

        for (token, phase) in expired {
            match phase {
                Phase::HeaderRead | Phase::BodyRead => {
                    debug!(client = token.0, "request timeout");
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.request.connection = ConnectionHint::Close;
                    }
                    self.fail_with(token, HTTP_REQUEST_TIMEOUT);
                }
                Phase::Gateway => {
                    debug!(client = token.0, "gateway timeout");
                    self.withdraw_gateway(token);
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.request.connection = ConnectionHint::Close;
                    }
                    self.fail_with(token, HTTP_GATEWAY_TIMEOUT);
                }
                Phase::Sending | Phase::KeepAlive => {
                    debug!(client = token.0, "idle timeout");
                    self.close_connection(token);
                }
            }
        }

        self.sessions.cleanup_if_due();
    }
}
