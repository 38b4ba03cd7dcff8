use crate::config::Config;
use crate::engine::numbers::NumberPool;
use crate::engine::Engine;
use crate::handler::{self, AppState};
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct App {
    pub config: Arc<Config>,
    pub engine: Arc<Engine>,
    web_only: bool,
}

pub struct AppBuilder {
    config: Option<Config>,
    csv: Option<String>,
    web_only: bool,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            csv: None,
            web_only: false,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn csv(mut self, csv: Option<String>) -> Self {
        self.csv = csv;
        self
    }

    pub fn web_only(mut self, web_only: bool) -> Self {
        self.web_only = web_only;
        self
    }

    pub fn build(self) -> Result<App> {
        let config = Arc::new(self.config.unwrap_or_default());
        let numbers = NumberPool::new();
        match self.csv {
            Some(ref path) => {
                numbers.load_csv(path)?;
            }
            None => {
                info!("no csv provided, using built-in test numbers");
                numbers.replace(NumberPool::test_pairs());
            }
        }
        let local_ip = crate::net::local_ip();
        let engine = Engine::new(config.clone(), local_ip, numbers);
        Ok(App {
            config,
            engine,
            web_only: self.web_only,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Bring up the control surface (bind failures are startup-fatal), then
    /// the engine unless running web-only. Resolves only when the web server
    /// exits; with no web server it parks forever and leaves shutdown to the
    /// signal path in `main`.
    pub async fn run(&self) -> Result<()> {
        let web = if self.config.control_surface.enabled {
            let addr = SocketAddr::from(([0, 0, 0, 0], self.config.control_surface.bind_port));
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| anyhow!("failed to bind control surface on {}: {}", addr, e))?;
            info!("control surface on http://{}", addr);
            let router = handler::router(AppState {
                engine: self.engine.clone(),
                config: self.config.clone(),
            });
            Some(tokio::spawn(async move {
                axum::serve(listener, router).await.ok();
            }))
        } else {
            None
        };

        if !self.web_only {
            self.engine.start().await?;
        }

        match web {
            Some(server) => {
                server.await.ok();
            }
            None => std::future::pending::<()>().await,
        }
        Ok(())
    }
}
