use std::io::Cursor;
use std::sync::{Arc, Mutex};

use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub struct FakeBackend {
    pub url: String,
}

impl FakeBackend {
    pub async fn start(build: impl FnOnce(Router) -> Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("fake backend should bind");
        let addr = listener.local_addr().expect("fake backend has an address");
        let router = build(Router::new());
        tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .expect("fake backend should serve");
        });
        Self {
            url: format!("http://{addr}"),
        }
    }
}

#[derive(Clone, Default)]
pub struct Calls {
    inner: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Calls {
    pub fn record(&self, endpoint: &str, body: Value) {
        self.inner
            .lock()
            .expect("calls lock")
            .push((endpoint.to_string(), body));
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    pub fn bodies(&self, endpoint: &str) -> Vec<Value> {
        self.inner
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(seen, _)| seen == endpoint)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

pub fn tiny_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut bytes = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("png should encode");
    bytes.into_inner()
}

pub fn tiny_png_base64(width: u32, height: u32) -> String {
    STANDARD.encode(tiny_png(width, height))
}

pub fn sample_document(title: &str, score: f64) -> Value {
    json!({
        "title": title,
        "content": format!("{title} content"),
        "image_data": tiny_png_base64(4, 3),
        "score": score,
    })
}

pub fn search_payload(topic: &str, models: usize, docs_per_model: usize) -> Value {
    let mut payload = serde_json::Map::new();
    payload.insert("query".to_string(), json!(topic));
    for model in 1..=models {
        let documents = (1..=docs_per_model)
            .map(|idx| {
                sample_document(
                    &format!("{topic} m{model} d{idx}"),
                    10.0 - idx as f64,
                )
            })
            .collect::<Vec<Value>>();
        payload.insert(format!("model_{model}_documents"), Value::Array(documents));
    }
    Value::Object(payload)
}
