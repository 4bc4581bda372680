//! The demo daemon (`SPEC_FULL.md` §A "server"): wires
//! [`fileport_kernel::TcpServer`] + [`fileport_http::HttpSessionFactory`]
//! + [`fileport_http::Router`] + the auth/file handlers into a runnable
//! process, in the manner of the teacher's `tests/util/server` binary.
//! Out-of-scope collaborators (FTP, user/group storage, ACME, update
//! checker, admin RMP channel) are simply absent from the serving path,
//! per `SPEC_FULL.md` §A.

mod cli;
mod config;
mod tls;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use fileport_auth::{AuthorizedFileServer, Authorizator, Sharer, StaticAuthenticator, StaticMountResolver, TokenKey};
use fileport_http::file_server::FileServer;
use fileport_http::rewriter::Rewriter;
use fileport_http::router::Router;
use fileport_http::session::{HttpSession, HttpSessionFactory};
use fileport_kernel::{AddressInfo, AllowAll, TcpServer};
use fileport_tvfs::LocalFilesystem;

use config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = cli::Cli::parse().into_config()?;
    run(config).await
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let authenticator = Arc::new(StaticAuthenticator::new(
        config.users.iter().map(|u| (u.username.clone(), u.password.clone())),
    ));
    let authorizator = Arc::new(Authorizator::new(authenticator).with_ttls(
        Duration::from_secs(config.access_token_ttl_secs),
        Duration::from_secs(config.refresh_token_ttl_secs),
    ));

    // Every session user's mount tree is `doc_root/<username>` in this
    // demo; a real deployment resolves this from the user/group store
    // `SPEC_FULL.md` §D puts out of scope.
    let mounts = StaticMountResolver::new(
        config
            .users
            .iter()
            .map(|u| (u.username.clone(), config.doc_root.join(&u.username))),
    );
    let files_handler = Arc::new(AuthorizedFileServer::new(
        authorizator.clone(),
        mounts,
        config.files.clone().into(),
    ));

    let share_mounts = StaticMountResolver::new(
        config
            .users
            .iter()
            .map(|u| (u.username.clone(), config.doc_root.join(&u.username))),
    );
    let sharer = Arc::new(Sharer::new(
        authorizator.clone(),
        TokenKey::generate(),
        share_mounts,
        config.files.clone().into(),
    ));

    let webui = FileServer::new(LocalFilesystem::new(config.doc_root.clone()), config.webui.clone().into());

    let mut router = Router::new();
    router.add_route("/auth", authorizator.clone());
    router.add_route("/files", files_handler);
    router.add_route("/shared", sharer);
    router.add_route("/", Arc::new(Rewriter::new(webui)));

    let mut session_factory = HttpSessionFactory::new(Arc::new(router)).with_timeouts(
        Duration::from_secs(config.activity_timeout_secs),
        Duration::from_secs(config.keepalive_timeout_secs),
    );
    if let Some(tls) = &config.tls {
        session_factory = session_factory.with_tls(tls::load(&tls.cert_path, &tls.key_path)?);
    }

    let mut server = TcpServer::<HttpSession>::new();
    let addresses: Vec<AddressInfo> = config
        .listen
        .iter()
        .map(|l| AddressInfo::new(l.host.clone(), l.port))
        .collect();
    for addr in &addresses {
        tracing::info!(address = %addr, "listening");
    }
    server.set_listen_address_infos(addresses, Arc::new(AllowAll)).await;

    server.run(session_factory).await;
    Ok(())
}
