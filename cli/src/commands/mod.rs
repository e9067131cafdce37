//! CLI command definitions and dispatch.

mod build;
mod copy;
mod create_catalog;
mod fetch;
mod inspect;
mod push;
mod push_archive;
mod render;
mod system_reset;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use olm_oci_core::config::EngineConfig;
use olm_oci_core::descriptor::Descriptor;
use olm_oci_core::event::EventEmitter;
use olm_oci_runtime::graph::Artifact;
use olm_oci_runtime::{
    load_bundle, load_catalog, load_package, ContentStore, GraphBuilder, GraphCopier, ImageReference, LayoutStore,
    RegistryAuth, RemoteStore,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// OLM OCI - build, push, copy and inspect operator catalogs as OCI artifacts.
#[derive(Parser)]
#[command(name = "olm-oci", version, about)]
pub struct Cli {
    /// Engine configuration file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Maximum number of concurrent blob and store operations
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Talk plain HTTP to registries (local test registries only)
    #[arg(long, global = true)]
    pub plain_http: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build an artifact directory into an image layout archive
    Build(build::BuildArgs),
    /// Build an artifact directory and push it to a registry
    Push(push::PushArgs),
    /// Push a tagged root out of an image layout archive to a registry
    PushArchive(push_archive::PushArchiveArgs),
    /// Copy an artifact graph between registry repositories
    Copy(copy::CopyArgs),
    /// Print the structure of an artifact graph
    Inspect(inspect::InspectArgs),
    /// Read a catalog, package, channel or bundle back and print its tree
    Fetch(fetch::FetchArgs),
    /// Build a catalog archive from a directory of bundle archives
    CreateCatalog(create_catalog::CreateCatalogArgs),
    /// Render a package or catalog directory as a declarative config
    Render(render::RenderArgs),
    /// Manage local state
    System {
        #[command(subcommand)]
        command: SystemCommand,
    },
}

/// `olm-oci system` subcommands.
#[derive(Subcommand)]
pub enum SystemCommand {
    /// Delete the local cache layout
    Reset(system_reset::SystemResetArgs),
}

/// Which level of the catalog tree a directory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArtifactKind {
    Catalog,
    Package,
    Bundle,
}

impl ArtifactKind {
    /// Lowercase name, also used as the default tag.
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Catalog => "catalog",
            ArtifactKind::Package => "package",
            ArtifactKind::Bundle => "bundle",
        }
    }

    /// Load the directory at `dir` as this kind of artifact.
    pub fn load(&self, dir: &Path) -> Result<Arc<dyn Artifact>, Box<dyn std::error::Error>> {
        let artifact: Arc<dyn Artifact> = match self {
            ArtifactKind::Catalog => Arc::new(load_catalog(dir)?),
            ArtifactKind::Package => Arc::new(load_package(dir)?),
            ArtifactKind::Bundle => Arc::new(load_bundle(dir)?),
        };
        Ok(artifact)
    }
}

/// Resolved settings shared by every command.
pub struct Context {
    pub config: EngineConfig,
    pub plain_http: bool,
}

impl Context {
    fn new(cli: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match &cli.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        let mut config = config.with_env_overrides()?;
        if let Some(concurrency) = cli.concurrency {
            if concurrency == 0 {
                return Err("--concurrency must be at least 1".into());
            }
            config.concurrency = concurrency;
        }
        Ok(Self {
            config,
            plain_http: cli.plain_http,
        })
    }

    pub fn events(&self) -> EventEmitter {
        EventEmitter::new(self.config.event_capacity)
    }

    pub fn builder(&self, events: &EventEmitter) -> GraphBuilder {
        GraphBuilder::new(self.config.concurrency).with_events(events.clone())
    }

    pub fn copier(&self, events: &EventEmitter) -> GraphCopier {
        GraphCopier::new(self.config.concurrency).with_events(events.clone())
    }

    /// Registry store for the repository of `reference`, with credentials from the environment.
    pub fn remote(&self, reference: &ImageReference) -> Arc<RemoteStore> {
        let auth = RegistryAuth::from_env();
        let store = if self.plain_http {
            RemoteStore::insecure(reference.clone(), auth)
        } else {
            RemoteStore::new(reference.clone(), auth)
        };
        Arc::new(store)
    }

    /// The local cache layout, created on first use.
    pub fn open_cache(&self) -> Result<Arc<LayoutStore>, Box<dyn std::error::Error>> {
        Ok(Arc::new(LayoutStore::open(&self.config.store_dir)?))
    }
}

/// Split `archive.tar:tag` into the archive path and the optional tag.
///
/// An argument naming an existing file is taken whole.
pub fn split_archive_ref(arg: &str) -> (PathBuf, Option<String>) {
    if Path::new(arg).exists() {
        return (PathBuf::from(arg), None);
    }
    match arg.rsplit_once(':') {
        Some((path, tag)) if !path.is_empty() && !tag.is_empty() && !tag.contains('/') => {
            (PathBuf::from(path), Some(tag.to_string()))
        }
        _ => (PathBuf::from(arg), None),
    }
}

/// Root descriptor of a layout: the named tag, or the only tag when none is named.
pub async fn layout_root(store: &LayoutStore, tag: Option<&str>) -> Result<Descriptor, Box<dyn std::error::Error>> {
    if let Some(tag) = tag {
        return Ok(store.resolve(tag).await?);
    }
    let mut tags = store.tags().await;
    match tags.len() {
        1 => Ok(tags.remove(0).1),
        0 => Err("archive has no tagged roots".into()),
        n => {
            let names: Vec<String> = tags.into_iter().map(|(name, _)| name).collect();
            Err(format!(
                "archive has {n} tagged roots ({}); name one with <archive>:<tag>",
                names.join(", ")
            )
            .into())
        }
    }
}

/// Root descriptor named by a registry reference's digest or tag.
pub async fn remote_root(
    store: &RemoteStore,
    reference: &ImageReference,
) -> Result<Descriptor, Box<dyn std::error::Error>> {
    let name = reference
        .digest
        .as_deref()
        .or(reference.tag.as_deref())
        .ok_or_else(|| format!("reference '{reference}' must include a tag or digest"))?;
    Ok(store.resolve(name).await?)
}

/// Cancel `cancel` on Ctrl-C.
pub fn watch_interrupt(cancel: CancellationToken, command: &'static str) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(command, "Interrupted, stopping");
            cancel.cancel();
        }
    })
}

/// Store and root named by a layout archive (`etcd.tar[:tag]`) or a registry reference.
///
/// Archives are extracted into `workdir`. Registry graphs are first copied
/// into the local cache layout and read from there.
pub async fn open_target(
    ctx: &Context,
    target: &str,
    workdir: &Path,
    cancel: &CancellationToken,
) -> Result<(Arc<dyn ContentStore>, Descriptor), Box<dyn std::error::Error>> {
    let (archive, tag) = split_archive_ref(target);
    if archive.is_file() {
        let layout = LayoutStore::open_archive(&archive, workdir)?;
        let root = layout_root(&layout, tag.as_deref()).await?;
        return Ok((Arc::new(layout), root));
    }

    let reference = ImageReference::parse(target)?;
    let remote = ctx.remote(&reference);
    let root = remote_root(&remote, &reference).await?;
    let cache = ctx.open_cache()?;
    ctx.copier(&ctx.events())
        .with_cancellation(cancel.clone())
        .copy(remote, cache.clone(), &root, None)
        .await?;
    Ok((cache, root))
}

/// Dispatch a parsed CLI command to its handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::new(&cli)?;
    match cli.command {
        Command::Build(args) => build::execute(args, &ctx).await,
        Command::Push(args) => push::execute(args, &ctx).await,
        Command::PushArchive(args) => push_archive::execute(args, &ctx).await,
        Command::Copy(args) => copy::execute(args, &ctx).await,
        Command::Inspect(args) => inspect::execute(args, &ctx).await,
        Command::Fetch(args) => fetch::execute(args, &ctx).await,
        Command::CreateCatalog(args) => create_catalog::execute(args, &ctx).await,
        Command::Render(args) => render::execute(args, &ctx).await,
        Command::System { command } => match command {
            SystemCommand::Reset(args) => system_reset::execute(args, &ctx).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_archive_ref_with_tag() {
        let (path, tag) = split_archive_ref("/nonexistent/etcd.tar:v1");
        assert_eq!(path, PathBuf::from("/nonexistent/etcd.tar"));
        assert_eq!(tag.as_deref(), Some("v1"));
    }

    #[test]
    fn test_split_archive_ref_without_tag() {
        let (path, tag) = split_archive_ref("/nonexistent/etcd.tar");
        assert_eq!(path, PathBuf::from("/nonexistent/etcd.tar"));
        assert!(tag.is_none());
    }

    #[test]
    fn test_split_archive_ref_existing_file_wins() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("odd:name.tar");
        std::fs::write(&file, b"").unwrap();
        let arg = file.to_string_lossy().to_string();

        let (path, tag) = split_archive_ref(&arg);
        assert_eq!(path, file);
        assert!(tag.is_none());
    }

    #[test]
    fn test_parse_build_command() {
        let cli = Cli::try_parse_from(["olm-oci", "build", "package", "./etcd", "--output", "etcd.tar"]).unwrap();
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.kind, ArtifactKind::Package);
                assert_eq!(args.output, PathBuf::from("etcd.tar"));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_parse_create_catalog_command() {
        let cli = Cli::try_parse_from(["olm-oci", "create-catalog", "./bundles", "-o", "catalog.tar"]).unwrap();
        match cli.command {
            Command::CreateCatalog(args) => {
                assert_eq!(args.dir, PathBuf::from("./bundles"));
                assert_eq!(args.tag, "catalog");
                assert_eq!(args.channel, "default");
            }
            _ => panic!("expected create-catalog"),
        }
    }

    #[test]
    fn test_parse_global_options() {
        let cli = Cli::try_parse_from(["olm-oci", "system", "reset", "--concurrency", "3", "--plain-http"]).unwrap();
        assert_eq!(cli.concurrency, Some(3));
        assert!(cli.plain_http);
        assert!(matches!(
            cli.command,
            Command::System {
                command: SystemCommand::Reset(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_layout_root_requires_single_tag() {
        let tmp = TempDir::new().unwrap();
        let store = LayoutStore::open(tmp.path()).unwrap();
        let a = Descriptor::from_bytes(olm_oci_core::media_type::MARKDOWN, b"a");
        let b = Descriptor::from_bytes(olm_oci_core::media_type::MARKDOWN, b"b");
        store.push(&a, b"a".to_vec()).await.unwrap();
        store.push(&b, b"b".to_vec()).await.unwrap();

        assert!(layout_root(&store, None).await.is_err());
        store.tag(&a, "first").await.unwrap();
        assert_eq!(layout_root(&store, None).await.unwrap(), a);
        store.tag(&b, "second").await.unwrap();
        assert!(layout_root(&store, None).await.is_err());
        assert_eq!(layout_root(&store, Some("second")).await.unwrap(), b);
    }
}
