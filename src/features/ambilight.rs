//! Mirrors the edge of the rendered scene onto the LED ring.

use super::ListenerError;
use crate::config::AmbilightConfig;
use crate::geometry::{Rectangle, Vector};
use crate::led::{LedHandler, priority};
use crate::protocol::Rgb;
use crate::scene::{FrameSource, SceneFrame};
use async_trait::async_trait;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::trace;

pub struct Ambilight {
    source: Arc<dyn FrameSource>,
    enabled: bool,
    offset: i64,
    min_brightness: u8,
    max_brightness: u8,
}

impl Ambilight {
    pub fn new(source: Arc<dyn FrameSource>, config: &AmbilightConfig) -> Self {
        Self {
            source,
            enabled: config.enabled,
            offset: i64::from(config.led.offset),
            min_brightness: config.brightness.min,
            max_brightness: config.brightness.max,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// One colour triple per LED, sampled along rays from the frame centre.
    /// `None` when every sampled pixel is black.
    pub fn compile_leds(&self, frame: &SceneFrame, count: usize) -> Option<Vec<u8>> {
        if count == 0 || frame.width == 0 || frame.height == 0 {
            return None;
        }
        let bounds = Rectangle::new(
            Vector::new(0.0, 0.0),
            Vector::new(frame.width as f64, frame.height as f64),
        );
        let background = self.source.background();
        let angle = -(2.0 * PI) / count as f64;
        let offset = self.offset.rem_euclid(count as i64) as f64;
        let min = f64::from(self.min_brightness);
        let span = f64::from(self.max_brightness) - min;

        let mut leds = Vec::with_capacity(count * 3);
        let mut total = 0u32;
        for i in 0..count {
            let direction = Vector::new(0.0, 1.0).rotate(angle * (offset + i as f64));
            let color = find_color_along(frame, &bounds, direction, background);
            for channel in [color.r, color.g, color.b] {
                total += u32::from(channel);
                leds.push((f64::from(channel) * span / 255.0 + min) as u8);
            }
        }
        (total > 0).then_some(leds)
    }
}

/// Walk from the border towards the centre and take the first pixel that is
/// neither background nor black. Falls back to the centre pixel.
fn find_color_along(
    frame: &SceneFrame,
    bounds: &Rectangle,
    direction: Vector,
    background: Rgb,
) -> Rgb {
    let center = bounds.center();
    let direction = direction.scale(1.0 / direction.x.abs().max(direction.y.abs()));
    let steps = bounds.intersection_from_center(direction).floor() as i64;
    for i in (0..=steps).rev() {
        let x = (center.x + direction.x * i as f64).floor();
        let y = (center.y + direction.y * i as f64).floor();
        if x < 0.0 || y < 0.0 {
            continue;
        }
        let Some(pixel) = frame.pixel(x as usize, y as usize) else {
            continue;
        };
        if pixel == background {
            continue;
        }
        if pixel != Rgb::BLACK {
            return pixel;
        }
    }
    frame
        .pixel(center.x.floor() as usize, center.y.floor() as usize)
        .unwrap_or(Rgb::BLACK)
}

#[async_trait]
impl LedHandler for Ambilight {
    fn name(&self) -> &str {
        "ambilight"
    }

    fn priority(&self) -> i32 {
        if self.is_enabled() {
            priority::AMBILIGHT
        } else {
            priority::OFF
        }
    }

    async fn update_leds(&self, count: usize) -> Result<Option<Vec<u8>>, ListenerError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let Some(frame) = self.source.capture() else {
            trace!("No scene frame available");
            return Ok(None);
        };
        Ok(self.compile_leds(&frame, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bounds;
    use crate::scene::{InMemoryScene, Player};

    struct StaticFrame(SceneFrame);

    impl FrameSource for StaticFrame {
        fn capture(&self) -> Option<SceneFrame> {
            Some(self.0.clone())
        }

        fn background(&self) -> Rgb {
            GRAY
        }
    }

    const GRAY: Rgb = Rgb::new(0x99, 0x99, 0x99);
    const RED: Rgb = Rgb::new(200, 0, 0);
    const BLUE: Rgb = Rgb::new(0, 0, 200);

    /// 10x10 frame, top half `top`, bottom half `bottom`.
    fn split_frame(top: Rgb, bottom: Rgb) -> SceneFrame {
        let mut pixels = Vec::new();
        for y in 0..10 {
            let c = if y < 5 { top } else { bottom };
            for _ in 0..10 {
                pixels.extend_from_slice(&[c.r, c.g, c.b, 255]);
            }
        }
        SceneFrame {
            width: 10,
            height: 10,
            pixels,
        }
    }

    fn config(enabled: bool, offset: i32, min: u8, max: u8) -> AmbilightConfig {
        let mut config = AmbilightConfig::default();
        config.enabled = enabled;
        config.led.offset = offset;
        config.brightness.min = min;
        config.brightness.max = max;
        config
    }

    fn ambilight(frame: SceneFrame, offset: i32, min: u8, max: u8) -> Ambilight {
        Ambilight::new(Arc::new(StaticFrame(frame)), &config(true, offset, min, max))
    }

    #[tokio::test]
    async fn test_rays_sample_opposite_edges() {
        let light = ambilight(split_frame(BLUE, RED), 0, 0, 255);
        let leds = light.update_leds(2).await.unwrap().unwrap();
        // LED 0 looks down, LED 1 up
        assert_eq!(leds, vec![200, 0, 0, 0, 0, 200]);

        let rotated = ambilight(split_frame(BLUE, RED), 1, 0, 255);
        assert_eq!(rotated.update_leds(2).await.unwrap().unwrap(), vec![0, 0, 200, 200, 0, 0]);
    }

    #[tokio::test]
    async fn test_background_is_skipped() {
        // bottom edge is background; the walk continues to the centre row
        let mut frame = split_frame(BLUE, GRAY);
        let centre = (5 + 5 * 10) * 4;
        frame.pixels[centre..centre + 3].copy_from_slice(&[0, 90, 0]);
        let light = ambilight(frame, 0, 0, 255);
        let leds = light.update_leds(1).await.unwrap().unwrap();
        assert_eq!(leds, vec![0, 90, 0]);
    }

    #[tokio::test]
    async fn test_all_background_falls_back_to_centre() {
        let light = ambilight(split_frame(GRAY, GRAY), 0, 0, 255);
        assert_eq!(light.update_leds(1).await.unwrap().unwrap(), vec![0x99; 3]);
    }

    #[tokio::test]
    async fn test_black_frame_yields_nothing() {
        let light = ambilight(split_frame(Rgb::BLACK, Rgb::BLACK), 0, 10, 200);
        assert_eq!(light.update_leds(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_brightness_is_scaled() {
        let light = ambilight(split_frame(Rgb::new(255, 255, 255), Rgb::new(255, 0, 0)), 0, 10, 110);
        assert_eq!(light.update_leds(1).await.unwrap().unwrap(), vec![110, 10, 10]);
    }

    #[tokio::test]
    async fn test_in_memory_scene_reaches_the_ring() {
        let scene = Arc::new(InMemoryScene::new(100.0, GRAY));
        for (id, color, y) in [("red", RED, 0.0), ("blue", BLUE, 200.0)] {
            scene
                .add_player(
                    Player {
                        id: id.into(),
                        name: id.into(),
                        color,
                    },
                    None,
                )
                .unwrap();
            let bounds = Bounds {
                x: 0.0,
                y,
                width: 300.0,
                height: 100.0,
            };
            scene.add_token(id, id, vec![id.into()], bounds).unwrap();
        }
        let light = Ambilight::new(scene, &config(true, 0, 0, 255));
        assert_eq!(light.update_leds(2).await.unwrap().unwrap(), vec![0, 0, 200, 200, 0, 0]);
    }

    #[tokio::test]
    async fn test_disabled_is_off() {
        let light = ambilight(split_frame(BLUE, RED), 0, 0, 255);
        assert_eq!(light.priority(), priority::AMBILIGHT);
        let light = Ambilight::new(
            Arc::new(StaticFrame(split_frame(BLUE, RED))),
            &config(false, 0, 0, 255),
        );
        assert_eq!(light.priority(), priority::OFF);
        assert_eq!(light.update_leds(2).await.unwrap(), None);
    }
}
