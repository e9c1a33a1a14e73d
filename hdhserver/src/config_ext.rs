//! Mounts the configuration REST API of `hdhconfig` on the server.

use crate::Server;
use hdhconfig::{api, get_config, ApiDoc};
use utoipa::OpenApi;

pub trait ConfigExt {
    /// Registers the configuration API as `config`:
    ///
    /// - `GET /api/config`: the whole tree
    /// - `GET /api/config/{path}`: one value, `path` dotted (`icecast.mount`)
    /// - `POST /api/config`: update one value, saved to disk
    /// - `GET /api-docs/config.json`: OpenAPI document
    async fn init_config_api(&mut self);
}

impl ConfigExt for Server {
    async fn init_config_api(&mut self) {
        self.add_openapi(api::create_router(get_config()), ApiDoc::openapi(), "config")
            .await;
    }
}
