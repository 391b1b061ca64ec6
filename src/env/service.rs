//! Service-level control: operations that talk to the head node or to this
//! role's Minecraft instance over fresh, short-lived connections.

use crate::env::Env;
use crate::error::{Error, Result};
use crate::protocol::{decode_u32, Request, Transport};

impl Env {
    /// Release this role's claim on the head node and drop the command
    /// connection. Never fails; errors go to the error sink.
    pub async fn close(&mut self) {
        if let Err(e) = self.close_token().await {
            self.error_sink.log_error("close", &e);
        }
        self.drop_client().await;
    }

    async fn close_token(&self) -> Result<()> {
        let token = self.token();
        let mut head = Transport::open(&self.head.host, self.head.port).await?;
        head.request(&Request::Close(&token)).await?;
        let ok = decode_u32("close", &head.recv_required("close").await?)?;
        head.shutdown().await;
        if ok == 0 {
            return Err(Error::Env(format!("close of {} was refused", token)));
        }
        Ok(())
    }

    /// Reset the head node's episode bookkeeping for this token.
    pub async fn reinit(&self) -> Result<bool> {
        let token = self.token();
        let mut head = Transport::open(&self.head.host, self.head.port).await?;
        head.request(&Request::Init(&token)).await?;
        let ok = decode_u32("init", &head.recv_required("init").await?)?;
        head.shutdown().await;
        Ok(ok != 0)
    }

    /// Tell this role's Minecraft instance to exit. An orchestrator is
    /// expected to relaunch it; expect connection errors around this call.
    pub async fn exit(&self) -> Result<bool> {
        let token = self.token();
        let mut node = Transport::open(&self.node.host, self.node.port).await?;
        node.request(&Request::Exit(&token)).await?;
        let ok = decode_u32("exit", &node.recv_required("exit").await?)?;
        node.shutdown().await;
        Ok(ok != 0)
    }

    /// Ping the head node (`head == true`) or this role's node.
    pub async fn status(&self, head: bool) -> Result<String> {
        let endpoint = if head { &self.head } else { &self.node };
        let mut conn = Transport::open(&endpoint.host, endpoint.port).await?;
        conn.request(&Request::Status).await?;
        let status = conn.recv_string("status").await?;
        conn.shutdown().await;
        Ok(status)
    }

    /// Wait until both the head node and this role's node answer `status`.
    /// Fails as soon as one of them stays unreachable, head first.
    pub async fn resync(&self) -> Result<()> {
        for head in [true, false] {
            let mut attempts = self.config.retry.resync.start();
            loop {
                match self.status(head).await {
                    Ok(status) => {
                        tracing::debug!(head, %status, "service reachable");
                        break;
                    }
                    Err(e) => {
                        self.error_sink.log_error("resync", &e);
                        if attempts.exhausted() {
                            let endpoint = if head { &self.head } else { &self.node };
                            return Err(Error::Env(format!(
                                "failed to contact service ({} node {} unreachable)",
                                if head { "head" } else { "role" },
                                endpoint
                            )));
                        }
                        attempts.wait().await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Restart this role's Minecraft instance and wait for it to come back.
    pub async fn exit_resync(&mut self) -> Result<()> {
        tracing::info!(role = self.config.role, node = %self.node, "exit and resync");
        self.drop_client().await;
        if let Err(e) = self.exit().await {
            self.error_sink.log_error("exit", &e);
        }
        tracing::info!(pause = ?self.config.retry.exit_pause, "waiting for service restart");
        tokio::time::sleep(self.config.retry.exit_pause).await;
        self.resync().await
    }
}
