#[macro_use]
extern crate rocket;

use std::process;
use std::sync::Arc;

use dotenv::dotenv;
use env_logger::Env as LogEnv;
use log::{error, info};
use responsive_images::images::RasterBackend;
use responsive_images::{AppConfig, Engine, ResponsiveImages, Settings};
use rocket::{
    figment::{
        providers::{Env, Format, Toml},
        Figment, Profile,
    },
    fs::FileServer,
    Config,
};

#[launch]
async fn rocket() -> _ {
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(LogEnv::default().default_filter_or("info"));

    // Load config
    let figment = Figment::from(Config::default())
        .merge(Toml::file("App.toml").nested())
        .merge(Env::prefixed("APP_").global())
        .select(Profile::from_env_or("APP_PROFILE", "default"));

    let config = match figment.extract::<AppConfig>() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let settings = match Settings::from_config(&config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };
    info!("Configuration loaded successfully");

    if !settings.static_dir.is_dir() {
        error!(
            "Static directory does not exist: {}",
            settings.static_dir.display()
        );
        process::exit(1);
    }

    info!(
        "Watching {:?} in {} ({:?} scaling, cache suffix '{}')",
        config.watched_directories,
        settings.static_dir.display(),
        settings.scale_by,
        settings.cache_suffix
    );

    let static_dir = settings.static_dir.clone();
    let engine = Engine::new(settings, Arc::new(RasterBackend::new()));

    info!(
        "Starting responsive image server on {}:{}",
        config.address, config.port
    );

    rocket::custom(figment)
        .attach(ResponsiveImages::new(engine))
        .mount("/", FileServer::from(static_dir))
}
