//! Deterministic per-task colors.
//!
//! Each task id hashes to a hue on the golden-ratio distribution, which
//! keeps neighboring ids visually far apart. Saturation and lightness are
//! fixed at 0.7 / 0.6 and the HSL value converts to 24-bit truecolor.

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::Mutex,
};

const GOLDEN_RATIO_CONJUGATE: f64 = 0.618_033_988_749_895;
const SATURATION: f64 = 0.7;
const LIGHTNESS: f64 = 0.6;

#[derive(Debug, Default)]
pub struct ColorSelector {
    assigned: Mutex<HashMap<String, (u8, u8, u8)>>,
}

impl ColorSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color_for(&self, key: &str) -> (u8, u8, u8) {
        let mut assigned = self.assigned.lock().expect("color cache poisoned");
        if let Some(color) = assigned.get(key) {
            return *color;
        }
        let color = hsl_to_rgb(hue_for(key), SATURATION, LIGHTNESS);
        assigned.insert(key.to_string(), color);
        color
    }
}

fn hue_for(key: &str) -> f64 {
    // DefaultHasher::new() uses fixed keys, so the hue is stable across runs
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let unit = hasher.finish() as f64 / u64::MAX as f64;
    (unit + GOLDEN_RATIO_CONJUGATE).fract()
}

fn hsl_to_rgb(hue: f64, saturation: f64, lightness: f64) -> (u8, u8, u8) {
    let chroma = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let hue_prime = hue * 6.0;
    let x = chroma * (1.0 - (hue_prime % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hue_prime as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = lightness - chroma / 2.0;
    (
        ((r1 + m) * 255.0).round() as u8,
        ((g1 + m) * 255.0).round() as u8,
        ((b1 + m) * 255.0).round() as u8,
    )
}
