use macroquad::prelude::*;

use tiled_engine::{load_levels, Game, GameContext, NoScripts};

fn window_conf() -> Conf {
    Conf {
        window_title: "Top-down demo".into(),
        window_width: 640,
        window_height: 480,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "assets/level1.tmx".to_string());

    let (_map, mut levels) = load_levels(&path).expect("Failed to load map");
    if levels.is_empty() {
        panic!("{path} has no group_* partitions");
    }

    let context = GameContext::new(levels.remove(0), Box::new(NoScripts));
    Game::new(context).run().await;
}
