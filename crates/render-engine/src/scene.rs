//! Scene graph: the ordered set of layers composited each pass.
//!
//! The graph is owned by the render task. Other tasks edit it by sending
//! [`SceneCommand`]s through a [`SceneEditor`]; the render task applies
//! pending commands between composite passes, never during one.

use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::SourceId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::effect::Effect;

/// Placement of a layer on the output canvas, in output pixels.
///
/// `x`/`y` position the scaled (unrotated) layer's top-left corner; rotation
/// is applied about the layer's center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub rotation_deg: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::at(0.0, 0.0)
    }
}

impl Transform {
    /// Unscaled, unrotated placement at `(x, y)`.
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation_deg: 0.0,
        }
    }

    /// Fit a `src_w`x`src_h` layer inside the box at `(x, y)` of size
    /// `w`x`h`, preserving aspect ratio and centering the result.
    pub fn fit(src_w: u32, src_h: u32, x: f32, y: f32, w: f32, h: f32) -> Self {
        if src_w == 0 || src_h == 0 {
            return Self::at(x, y);
        }
        let scale = (w / src_w as f32).min(h / src_h as f32);
        let fitted_w = src_w as f32 * scale;
        let fitted_h = src_h as f32 * scale;
        Self {
            x: x + (w - fitted_w) / 2.0,
            y: y + (h - fitted_h) / 2.0,
            scale_x: scale,
            scale_y: scale,
            rotation_deg: 0.0,
        }
    }
}

/// One compositable layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    /// Unique within a graph.
    pub id: String,
    pub source: SourceId,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub z_order: i32,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Applied in declared order.
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_opacity() -> f32 {
    1.0
}

fn default_visible() -> bool {
    true
}

impl SceneNode {
    pub fn new(id: impl Into<String>, source: SourceId) -> Self {
        Self {
            id: id.into(),
            source,
            transform: Transform::default(),
            z_order: 0,
            opacity: 1.0,
            effects: Vec::new(),
            visible: true,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_z_order(mut self, z_order: i32) -> Self {
        self.z_order = z_order;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneGraph {
    nodes: Vec<SceneNode>,
    /// Fill color of the output canvas, RGBA.
    pub background: [u8; 4],
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new([0, 0, 0, 255])
    }
}

impl SceneGraph {
    pub fn new(background: [u8; 4]) -> Self {
        Self {
            nodes: Vec::new(),
            background,
        }
    }

    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SceneNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn get_mut(&mut self, id: &str) -> GoliveResult<&mut SceneNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| GoliveError::render(format!("No scene node named '{id}'")))
    }

    pub fn add(&mut self, node: SceneNode) -> GoliveResult<()> {
        if self.get(&node.id).is_some() {
            return Err(GoliveError::render(format!(
                "Scene node '{}' already exists",
                node.id
            )));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<SceneNode> {
        let idx = self.nodes.iter().position(|n| n.id == id)?;
        Some(self.nodes.remove(idx))
    }

    /// Visible nodes, back to front. Equal z-orders keep insertion order.
    pub fn draw_order(&self) -> Vec<&SceneNode> {
        let mut nodes: Vec<&SceneNode> = self.nodes.iter().filter(|n| n.visible).collect();
        nodes.sort_by_key(|n| n.z_order);
        nodes
    }

    /// Sources referenced by any node, visible or not.
    pub fn sources(&self) -> Vec<&SourceId> {
        let mut sources: Vec<&SourceId> = Vec::new();
        for node in &self.nodes {
            if !sources.contains(&&node.source) {
                sources.push(&node.source);
            }
        }
        sources
    }

    pub fn apply(&mut self, command: SceneCommand) -> GoliveResult<()> {
        match command {
            SceneCommand::AddNode(node) => self.add(node),
            SceneCommand::RemoveNode { id } => self
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| GoliveError::render(format!("No scene node named '{id}'"))),
            SceneCommand::Reorder { id, z_order } => {
                self.get_mut(&id)?.z_order = z_order;
                Ok(())
            }
            SceneCommand::SetEffects { id, effects } => {
                self.get_mut(&id)?.effects = effects;
                Ok(())
            }
            SceneCommand::SetOpacity { id, opacity } => {
                self.get_mut(&id)?.opacity = opacity.clamp(0.0, 1.0);
                Ok(())
            }
            SceneCommand::SetVisible { id, visible } => {
                self.get_mut(&id)?.visible = visible;
                Ok(())
            }
            SceneCommand::SetTransform { id, transform } => {
                self.get_mut(&id)?.transform = transform;
                Ok(())
            }
            SceneCommand::SetBackground { color } => {
                self.background = color;
                Ok(())
            }
        }
    }
}

/// An edit to the scene graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SceneCommand {
    AddNode(SceneNode),
    RemoveNode { id: String },
    Reorder { id: String, z_order: i32 },
    SetEffects { id: String, effects: Vec<Effect> },
    SetOpacity { id: String, opacity: f32 },
    SetVisible { id: String, visible: bool },
    SetTransform { id: String, transform: Transform },
    SetBackground { color: [u8; 4] },
}

/// Sending side of the scene edit channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SceneEditor {
    tx: mpsc::UnboundedSender<SceneCommand>,
}

impl SceneEditor {
    pub fn send(&self, command: SceneCommand) -> GoliveResult<()> {
        self.tx
            .send(command)
            .map_err(|_| GoliveError::invalid_state("Render task is not running"))
    }
}

/// Receiving side, held by the render task.
#[derive(Debug)]
pub struct SceneUpdates {
    rx: mpsc::UnboundedReceiver<SceneCommand>,
}

impl SceneUpdates {
    /// Apply every queued command to `graph`. Returns how many applied.
    ///
    /// A command that fails (unknown node, duplicate id) is logged and
    /// skipped; the rest still apply.
    pub fn apply_pending(&mut self, graph: &mut SceneGraph) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.rx.try_recv() {
            match graph.apply(command) {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!(error = %e, "Scene command rejected"),
            }
        }
        applied
    }
}

pub fn scene_channel() -> (SceneEditor, SceneUpdates) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SceneEditor { tx }, SceneUpdates { rx })
}
