use std::sync::Arc;

use log::{error, info, log};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::uri::Origin;
use rocket::http::{Method, RawStr};
use rocket::{Data, Request};

use crate::engine::Engine;
use crate::request::RequestSignals;

/// Request fairing that points image requests at their cached variant
/// before routing, so the mounted `FileServer` serves the variant.
pub struct ResponsiveImages {
    engine: Arc<Engine>,
}

impl ResponsiveImages {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

#[rocket::async_trait]
impl Fairing for ResponsiveImages {
    fn info(&self) -> Info {
        Info {
            name: "Responsive Images",
            kind: Kind::Request,
        }
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        if req.method() != Method::Get && req.method() != Method::Head {
            return;
        }

        let signals = request_signals(req);
        match self.engine.resolve(&signals).await {
            Ok(rewrite) => match Origin::parse_owned(encode_path(&rewrite)) {
                Ok(uri) => {
                    info!("({}) requested url updated to {}", signals.path, uri);
                    req.set_uri(uri);
                }
                Err(e) => error!("Cannot rewrite {} to {}: {}", signals.path, rewrite, e),
            },
            Err(rejection) => log!(rejection.level(), "({}) {}", signals.path, rejection),
        }
    }
}

fn request_signals(req: &Request<'_>) -> RequestSignals {
    let uri = req.uri();
    let path = RawStr::new(uri.path().as_str())
        .percent_decode_lossy()
        .into_owned();

    let query = uri
        .query()
        .map(|query| {
            query
                .segments()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let cookies: Vec<&str> = req.headers().get("Cookie").collect();

    RequestSignals {
        path,
        query,
        cookie: (!cookies.is_empty()).then(|| cookies.join("; ")),
        accept: req.headers().get_one("Accept").map(str::to_string),
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
