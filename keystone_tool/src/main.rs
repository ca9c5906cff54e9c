use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::Parser;
use color_eyre as ey;
use ey::eyre::{bail, Context};
use keystone_content::{
    kinds::{ConfigAsset, PrimitiveAsset, ResourceId, ShaderAsset, SoftwareContext, TextureAsset},
    Asset, AssetCache, AssetCacheConfig, AssetKey, AssetType, FileSystem, LoadMode,
};
use keystone_shared::log::{self, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
enum CommandLineArguments {
    Load(Load),
}

/// Loads assets from a directory and prints what was created
#[derive(Parser, Debug)]
struct Load {
    /// Directory the keys are relative to
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// YAML file with the cache configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load every asset on the calling thread
    #[arg(long)]
    inline: bool,

    /// Time after which the tool stops waiting for the assets
    #[arg(short, long, default_value = "10000")]
    timeout_ms: u64,

    /// Keys of the assets. The kind is chosen by the extension.
    #[arg(required = true)]
    keys: Vec<PathBuf>,
}

enum Loaded {
    Texture(Asset<TextureAsset>),
    Shader(Asset<ShaderAsset>),
    Primitive(Asset<PrimitiveAsset>),
    Config(Asset<ConfigAsset>),
}

fn load<T>(cache: &AssetCache<SoftwareContext>, key: &Path, mode: LoadMode, context: &mut SoftwareContext) -> Asset<T>
where
    T: AssetType<Context = SoftwareContext>,
{
    cache.request_with::<T>(key, T::Params::default(), mode, context)
}

fn summary<T: AssetType>(asset: &Asset<T>, describe_resource: impl Fn(&T::Resource) -> String) -> String {
    let resource = asset.resource().map(|resource| describe_resource(&resource)).unwrap_or_else(|| "-".to_owned());
    match (asset.failure(), asset.is_substituted()) {
        (Some(error), true) => format!("{} {} replaced by fallback {resource}: {error}", T::TYPE_TAG, asset.key()),
        (Some(error), false) => format!("{} {} failed: {error}", T::TYPE_TAG, asset.key()),
        (None, _) => format!("{} {} {:?} {resource}", T::TYPE_TAG, asset.key(), asset.state()),
    }
}

fn main() -> ey::Result<()> {
    color_eyre::install()?;

    // Setup logging
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                keystone_shared::chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Debug)
        .chain(io::stdout())
        .apply()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    let command_line_arguments = CommandLineArguments::parse();
    match command_line_arguments {
        CommandLineArguments::Load(load_arguments) => run_load(load_arguments),
    }
}

fn run_load(arguments: Load) -> ey::Result<()> {
    let config = match &arguments.config {
        Some(path) => AssetCacheConfig::from_file(path).wrap_err("Failed to read the cache configuration")?,
        None => AssetCacheConfig::default(),
    };
    let storage = FileSystem::new(&arguments.root).wrap_err_with(|| format!("Failed to open the directory {:?}", arguments.root))?;
    let cache = AssetCache::<SoftwareContext>::builder()
        .with_config(config)
        .with_storage(storage)
        .build()
        .wrap_err("Failed to start the asset cache")?;
    info!("Loading {} assets with {} workers", arguments.keys.len(), cache.worker_count());

    let mode = match arguments.inline {
        true => LoadMode::Inline,
        false => LoadMode::Threaded,
    };
    let mut context = SoftwareContext::new();
    let mut loaded = Vec::new();
    for key in &arguments.keys {
        let extension = AssetKey::new(key).extension().unwrap_or_default();
        let asset = match extension.as_str() {
            "png" | "jpg" | "jpeg" => Loaded::Texture(load(&cache, key, mode, &mut context)),
            "glsl" | "shader" => Loaded::Shader(load(&cache, key, mode, &mut context)),
            "prim" => Loaded::Primitive(load(&cache, key, mode, &mut context)),
            "cfg" => Loaded::Config(load(&cache, key, mode, &mut context)),
            _ => bail!("No asset kind for the key {key:?}"),
        };
        loaded.push(asset);
    }

    let start = Instant::now();
    let timeout = Duration::from_millis(arguments.timeout_ms);
    while !cache.ready_to_use() {
        if start.elapsed() > timeout {
            warn!("Stopped waiting for the assets after {timeout:?}");
            break;
        }
        if cache.tick(&mut context) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    for asset in &loaded {
        let line = match asset {
            Loaded::Texture(asset) => summary(asset, ResourceId::to_string),
            Loaded::Shader(asset) => summary(asset, ResourceId::to_string),
            Loaded::Primitive(asset) => summary(asset, ResourceId::to_string),
            Loaded::Config(asset) => summary(asset, |_| "without resource".to_owned()),
        };
        info!("{line}");
    }
    let statistics = cache.statistics();
    info!(
        "Committed {}, substituted {}, {} resources with {} bytes",
        statistics.committed,
        statistics.substituted,
        context.len(),
        context.allocated_bytes()
    );
    cache.shutdown();
    Ok(())
}
