//! Smart-invert a small vector scene and print it as JSON.
//!
//! Usage:
//! ```sh
//! cargo run --example invert_scene
//! ```

use smart_dark::color::{Color, DEFAULT_SAT_THRESHOLD};
use smart_dark::scene::{
    default_highlight_mappings, default_highlight_tolerance_sq, invert_scene_smart,
    remap_highlights, Paint, PaintStyle, TextNode, VectorScene, VectorSceneNode,
};

fn main() {
    let mut scene = VectorScene {
        background: Some(Color::WHITE),
        nodes: vec![
            VectorSceneNode::Text(TextNode {
                style: PaintStyle::filled(Color::BLACK),
                content: "Quarterly report".to_string(),
            }),
            VectorSceneNode::Rect(PaintStyle {
                fill: Paint::Solid(Color::rgb(255, 255, 0).with_alpha(0.4)),
                stroke: Paint::Solid(Color::rgb(40, 40, 40)),
            }),
            VectorSceneNode::Path(PaintStyle::filled(Color::rgb(200, 30, 30))),
        ],
        ..VectorScene::default()
    };

    let stats = invert_scene_smart(&mut scene, DEFAULT_SAT_THRESHOLD);
    let highlights = remap_highlights(
        &mut scene,
        &default_highlight_mappings(),
        default_highlight_tolerance_sq(),
    );

    println!(
        "recolored {} fills, {} strokes; remapped {highlights} highlights",
        stats.fills, stats.strokes
    );
    match serde_json::to_string_pretty(&scene) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
