use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::{json, Value};

use crate::api::{GenerationApi, HttpReply};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Http(HttpReply),
    Transport(String),
}

impl Reply {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Reply::Http(HttpReply::new(status, body.to_string()))
    }

    pub(crate) fn raw(status: u16, body: &str) -> Self {
        Reply::Http(HttpReply::new(status, body))
    }

    pub(crate) fn accepted(task_id: &str) -> Self {
        Reply::json(200, json!({"code": 0, "data": {"task_id": task_id}}))
    }

    pub(crate) fn status(status: &str) -> Self {
        Reply::json(200, json!({"data": {"status": status}}))
    }

    pub(crate) fn success(result: Value) -> Self {
        Reply::json(200, json!({"data": {"status": "success", "result": result}}))
    }

    fn into_result(self) -> Result<HttpReply> {
        match self {
            Reply::Http(reply) => Ok(reply),
            Reply::Transport(message) => Err(anyhow!(message)),
        }
    }
}

/// Replays canned replies in order and records every call it receives.
#[derive(Debug, Default)]
pub(crate) struct ScriptedApi {
    submit_script: Mutex<VecDeque<Reply>>,
    query_script: Mutex<VecDeque<Reply>>,
    query_fallback: Option<Reply>,
    submissions: Mutex<Vec<Value>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_submit(self, reply: Reply) -> Self {
        if let Ok(mut script) = self.submit_script.lock() {
            script.push_back(reply);
        }
        self
    }

    pub(crate) fn on_query(self, reply: Reply) -> Self {
        if let Ok(mut script) = self.query_script.lock() {
            script.push_back(reply);
        }
        self
    }

    /// Reply used once the query script runs dry.
    pub(crate) fn otherwise_query(mut self, reply: Reply) -> Self {
        self.query_fallback = Some(reply);
        self
    }

    pub(crate) fn submissions(&self) -> Vec<Value> {
        self.submissions
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

impl GenerationApi for ScriptedApi {
    fn submit(&self, payload: &Value, _timeout: Duration) -> Result<HttpReply> {
        self.submissions
            .lock()
            .map_err(|_| anyhow!("submissions lock poisoned"))?
            .push(payload.clone());
        let next = self
            .submit_script
            .lock()
            .map_err(|_| anyhow!("submit script lock poisoned"))?
            .pop_front();
        next.unwrap_or_else(|| Reply::Transport("no scripted submit reply".to_string()))
            .into_result()
    }

    fn query(&self, task_id: &str, _timeout: Duration) -> Result<HttpReply> {
        self.queries
            .lock()
            .map_err(|_| anyhow!("queries lock poisoned"))?
            .push(task_id.to_string());
        let next = self
            .query_script
            .lock()
            .map_err(|_| anyhow!("query script lock poisoned"))?
            .pop_front();
        next.or_else(|| self.query_fallback.clone())
            .unwrap_or_else(|| Reply::Transport("no scripted query reply".to_string()))
            .into_result()
    }
}

fn png_bytes(image: DynamicImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("in-memory png encode");
    out.into_inner()
}

pub(crate) fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(
        width,
        height,
        Rgb(color),
    )))
}

/// Fully transparent black: must flatten to white.
pub(crate) fn translucent_png(width: u32, height: u32) -> Vec<u8> {
    png_bytes(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba([0, 0, 0, 0]),
    )))
}

/// Deterministic high-entropy image that JPEG compresses poorly.
pub(crate) fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    let image = RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        };
        Rgb([next(), next(), next()])
    });
    png_bytes(DynamicImage::ImageRgb8(image))
}
