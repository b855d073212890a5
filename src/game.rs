//! The macroquad-driven main loop: input polling, simulation tick and
//! presentation, in that order every frame.

use macroquad::prelude::*;

use crate::context::{GameContext, InputState};
use crate::geom::Point;

pub struct Game {
    pub context: GameContext,
    texture: Option<Texture2D>,
}

impl Game {
    pub fn new(mut context: GameContext) -> Self {
        context.start();
        Game {
            context,
            texture: None,
        }
    }

    /// One simulation + presentation frame.
    pub fn frame(&mut self) {
        let input = InputState {
            left: is_key_down(KeyCode::Left),
            right: is_key_down(KeyCode::Right),
            up: is_key_down(KeyCode::Up),
            down: is_key_down(KeyCode::Down),
        };
        self.context.process_keys(input);

        if is_mouse_button_pressed(MouseButton::Left) {
            let (mx, my) = mouse_position();
            let level = &self.context.level;
            let world = Point::new(
                mx as i32 - level.viewport.x + level.x_offset,
                my as i32 - level.viewport.y + level.y_offset,
            );
            self.context.process_click(world);
        }

        let elapsed_ms = (get_frame_time() * 1000.0) as u32;
        self.context.animate(elapsed_ms);

        self.present();
    }

    /// Repaint the level composite when needed and blit it at the
    /// viewport position.
    fn present(&mut self) {
        let time_ms = (get_time() * 1000.0) as u32;
        let needs_upload = self.texture.is_none()
            || self.context.level.invalidated
            || self.context.level.map().borrow().has_tile_animations();

        let viewport = self.context.level.viewport;
        let composite = self.context.level.draw(time_ms);
        if needs_upload {
            let texture = Texture2D::from_rgba8(
                composite.width() as u16,
                composite.height() as u16,
                composite.as_raw(),
            );
            texture.set_filter(FilterMode::Nearest);
            self.texture = Some(texture);
        }
        if let Some(texture) = &self.texture {
            draw_texture(texture, viewport.x as f32, viewport.y as f32, WHITE);
        }
    }

    /// Drive the loop until the window closes or Escape is pressed.
    pub async fn run(mut self) {
        loop {
            if is_key_pressed(KeyCode::Escape) {
                break;
            }
            clear_background(BLACK);
            self.frame();
            next_frame().await;
        }
    }
}
