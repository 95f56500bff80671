use serde::{Deserialize, Serialize};

/// Sub-rectangle of an image, passed through to the renderer untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Quad {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Pre-computed world pose handed to the renderer for a single bone.
///
/// `rotation` and `scale_x` are already adjusted for a flipped skeleton, so a
/// backend can paint the sprite without knowing anything about flipping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrawPose {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    /// Horizontal scale to draw with; negative while the skeleton is flipped.
    pub scale_x: f32,
    /// Uniform skeleton scale.
    pub scale: f32,
    pub origin_x: f32,
    pub origin_y: f32,
}

/// Rendering backend abstraction. The core never touches pixels, it only
/// tells the backend which image to paint where.
pub trait Renderer {
    fn draw_image(&mut self, bone: &str, image: &str, quad: Option<&Quad>, pose: &DrawPose);
}

/// One recorded call to [`Renderer::draw_image`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawCommand {
    pub bone: String,
    pub image: String,
    pub quad: Option<Quad>,
    pub pose: DrawPose,
}

/// Renderer that records every draw call instead of painting. Used by the
/// command line front-end and by tests to observe draw order.
#[derive(Debug, Default, Clone)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Names of the drawn bones, in draw order.
    pub fn bone_names(&self) -> Vec<&str> {
        self.commands
            .iter()
            .map(|command| command.bone.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Renderer for DrawList {
    fn draw_image(&mut self, bone: &str, image: &str, quad: Option<&Quad>, pose: &DrawPose) {
        self.commands.push(DrawCommand {
            bone: bone.to_string(),
            image: image.to_string(),
            quad: quad.copied(),
            pose: *pose,
        });
    }
}
