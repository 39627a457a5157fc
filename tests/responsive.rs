use std::path::Path;
use std::sync::Arc;

use image::{Rgb, RgbImage};
use responsive_images::images::RasterBackend;
use responsive_images::{AppConfig, Engine, ResponsiveImages, Settings};
use rocket::fs::FileServer;
use rocket::http::{Header, Status};
use rocket::local::asynchronous::Client;
use tempfile::TempDir;

fn write_origin(root: &Path, width: u32, height: u32) {
    std::fs::create_dir_all(root.join("images")).unwrap();
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8])
    })
    .save(root.join("images/photo.png"))
    .unwrap();
}

async fn client(root: &Path, config: AppConfig) -> Client {
    let settings = Settings::from_config(&AppConfig {
        static_dir: root.to_path_buf(),
        breakpoints: vec![320, 480, 640, 800, 1024],
        ..config
    })
    .unwrap();
    let engine = Engine::new(settings, Arc::new(RasterBackend::new()));
    let rocket = rocket::build()
        .attach(ResponsiveImages::new(engine))
        .mount("/", FileServer::from(root));
    Client::tracked(rocket).await.unwrap()
}

#[rocket::async_test]
async fn serves_breakpoint_variant() {
    let tmp = TempDir::new().unwrap();
    write_origin(tmp.path(), 1200, 600);
    let client = client(tmp.path(), AppConfig::default()).await;

    let response = client
        .get("/images/photo.png")
        .header(Header::new("Cookie", "screen=1,500"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_bytes().await.unwrap();
    let served = image::load_from_memory(&body).unwrap();
    assert_eq!((served.width(), served.height()), (640, 320));
    assert!(tmp.path().join("images-cache/640/photo.png").is_file());
}

#[rocket::async_test]
async fn oversized_request_serves_original() {
    let tmp = TempDir::new().unwrap();
    write_origin(tmp.path(), 1200, 600);
    let client = client(tmp.path(), AppConfig::default()).await;

    let response = client
        .get("/images/photo.png")
        .header(Header::new("Cookie", "screen=2,800"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_bytes().await.unwrap();
    assert_eq!(body, std::fs::read(tmp.path().join("images/photo.png")).unwrap());
    assert!(!tmp.path().join("images-cache").exists());
}

#[rocket::async_test]
async fn missing_cookie_serves_original() {
    let tmp = TempDir::new().unwrap();
    write_origin(tmp.path(), 1200, 600);
    let client = client(tmp.path(), AppConfig::default()).await;

    let response = client.get("/images/photo.png").dispatch().await;
    let body = response.into_bytes().await.unwrap();
    assert_eq!(body, std::fs::read(tmp.path().join("images/photo.png")).unwrap());
}

#[rocket::async_test]
async fn direct_scaling_and_conversion() {
    let tmp = TempDir::new().unwrap();
    write_origin(tmp.path(), 1200, 600);
    let client = client(
        tmp.path(),
        AppConfig {
            direct_scaling: true,
            convertible_file_types: vec!["webp".to_string()],
            ..AppConfig::default()
        },
    )
    .await;

    let response = client
        .get("/images/photo.png?w=300&as=webp")
        .header(Header::new("Cookie", "screen=1,1000"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(
        response.content_type().map(|ct| ct.to_string()),
        Some("image/webp".to_string())
    );

    let body = response.into_bytes().await.unwrap();
    let served = image::load_from_memory(&body).unwrap();
    assert_eq!(served.width(), 300);
    assert!(tmp.path().join("images-cache/300/photo.webp").is_file());
}

#[rocket::async_test]
async fn unwatched_directory_is_untouched() {
    let tmp = TempDir::new().unwrap();
    write_origin(tmp.path(), 1200, 600);
    std::fs::create_dir_all(tmp.path().join("assets")).unwrap();
    std::fs::copy(
        tmp.path().join("images/photo.png"),
        tmp.path().join("assets/photo.png"),
    )
    .unwrap();
    let client = client(tmp.path(), AppConfig::default()).await;

    let response = client
        .get("/assets/photo.png")
        .header(Header::new("Cookie", "screen=1,500"))
        .dispatch()
        .await;
    let body = response.into_bytes().await.unwrap();
    assert_eq!(body, std::fs::read(tmp.path().join("assets/photo.png")).unwrap());
    assert!(!tmp.path().join("assets-cache").exists());
}
