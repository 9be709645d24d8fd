//! Node hierarchies, keyframe clips and bone palettes for skinned models.

use glam::{Mat4, Quat, Vec3};

/// Local translation, rotation and scale of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl NodeTransform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for NodeTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub parent: Option<usize>,
    /// Transform used when no animation channel targets the node.
    pub rest: NodeTransform,
}

/// Node hierarchy with a precomputed parent-before-child order.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    nodes: Vec<Node>,
    order: Vec<usize>,
}

impl Skeleton {
    /// Builds the hierarchy. Parents that are out of range or that would
    /// form a cycle are dropped, turning the node into a root.
    pub fn new(mut nodes: Vec<Node>) -> Self {
        let count = nodes.len();
        for index in 0..count {
            if let Some(parent) = nodes[index].parent {
                if parent >= count || creates_cycle(&nodes, index, parent) {
                    nodes[index].parent = None;
                }
            }
        }

        let mut children = vec![Vec::new(); count];
        let mut roots = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            match node.parent {
                Some(parent) => children[parent].push(index),
                None => roots.push(index),
            }
        }

        let mut order = Vec::with_capacity(count);
        let mut stack: Vec<usize> = roots.into_iter().rev().collect();
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(children[index].iter().rev());
        }

        Self { nodes, order }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn rest_pose(&self) -> Vec<NodeTransform> {
        self.nodes.iter().map(|node| node.rest).collect()
    }

    /// Resolves local transforms into model-space matrices.
    pub fn global_transforms(&self, locals: &[NodeTransform]) -> Vec<Mat4> {
        let mut globals = vec![Mat4::IDENTITY; self.nodes.len()];
        for &index in &self.order {
            let local = locals
                .get(index)
                .copied()
                .unwrap_or(self.nodes[index].rest)
                .matrix();
            globals[index] = match self.nodes[index].parent {
                Some(parent) => globals[parent] * local,
                None => local,
            };
        }
        globals
    }
}

fn creates_cycle(nodes: &[Node], child: usize, parent: usize) -> bool {
    let mut current = Some(parent);
    let mut steps = 0;
    while let Some(index) = current {
        if index == child || steps > nodes.len() {
            return true;
        }
        current = nodes.get(index).and_then(|node| node.parent);
        steps += 1;
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelValues {
    Translation(Vec<Vec3>),
    Rotation(Vec<Quat>),
    Scale(Vec<Vec3>),
}

impl ChannelValues {
    fn len(&self) -> usize {
        match self {
            ChannelValues::Translation(values) | ChannelValues::Scale(values) => values.len(),
            ChannelValues::Rotation(values) => values.len(),
        }
    }
}

/// Keyframes animating one property of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub node: usize,
    pub interpolation: Interpolation,
    /// Keyframe times in seconds, ascending.
    pub times: Vec<f32>,
    pub values: ChannelValues,
}

impl Channel {
    pub fn duration(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Index of the keyframe at or before `time` and the blend factor towards
    /// the following one.
    fn locate(&self, time: f32) -> Option<(usize, usize, f32)> {
        let count = self.times.len().min(self.values.len());
        if count == 0 {
            return None;
        }
        let last = count - 1;
        if time <= self.times[0] {
            return Some((0, 0, 0.0));
        }
        if time >= self.times[last] {
            return Some((last, last, 0.0));
        }
        let next = self.times[..count].partition_point(|&t| t <= time);
        let prev = next - 1;
        let span = self.times[next] - self.times[prev];
        let factor = if span > 0.0 {
            (time - self.times[prev]) / span
        } else {
            0.0
        };
        match self.interpolation {
            Interpolation::Linear => Some((prev, next, factor)),
            Interpolation::Step => Some((prev, prev, 0.0)),
        }
    }

    pub fn apply(&self, time: f32, transform: &mut NodeTransform) {
        let Some((a, b, t)) = self.locate(time) else {
            return;
        };
        match &self.values {
            ChannelValues::Translation(values) => {
                transform.translation = values[a].lerp(values[b], t);
            }
            ChannelValues::Rotation(values) => {
                transform.rotation = values[a].slerp(values[b], t).normalize();
            }
            ChannelValues::Scale(values) => {
                transform.scale = values[a].lerp(values[b], t);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    name: String,
    channels: Vec<Channel>,
    duration: f32,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, channels: Vec<Channel>) -> Self {
        let duration = channels.iter().map(Channel::duration).fold(0.0, f32::max);
        Self {
            name: name.into(),
            channels,
            duration,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Writes the clip's pose at `time` into `pose`, wrapping around the
    /// clip's duration.
    pub fn sample(&self, time: f32, pose: &mut [NodeTransform]) {
        let local_time = if self.duration > 0.0 {
            time.rem_euclid(self.duration)
        } else {
            0.0
        };
        for channel in &self.channels {
            if let Some(transform) = pose.get_mut(channel.node) {
                channel.apply(local_time, transform);
            }
        }
    }
}

/// Joints of a skinned primitive, in the order vertex joint indices use.
#[derive(Debug, Clone, PartialEq)]
pub struct Skin {
    pub joints: Vec<usize>,
    pub inverse_bind: Vec<Mat4>,
}

impl Skin {
    /// Bone matrices: each joint's global transform times its inverse bind
    /// matrix.
    pub fn palette(&self, globals: &[Mat4]) -> Vec<Mat4> {
        self.joints
            .iter()
            .enumerate()
            .map(|(slot, &joint)| {
                let global = globals.get(joint).copied().unwrap_or(Mat4::IDENTITY);
                let inverse_bind = self
                    .inverse_bind
                    .get(slot)
                    .copied()
                    .unwrap_or(Mat4::IDENTITY);
                global * inverse_bind
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn node(name: &str, parent: Option<usize>, translation: Vec3) -> Node {
        Node {
            name: name.to_string(),
            parent,
            rest: NodeTransform {
                translation,
                ..NodeTransform::IDENTITY
            },
        }
    }

    #[test]
    fn globals_compose_parent_first_regardless_of_storage_order() {
        // Child stored before its parent.
        let skeleton = Skeleton::new(vec![
            node("child", Some(1), Vec3::new(0.0, 1.0, 0.0)),
            node("root", None, Vec3::new(2.0, 0.0, 0.0)),
        ]);
        let globals = skeleton.global_transforms(&skeleton.rest_pose());
        let tip = globals[0].transform_point3(Vec3::ZERO);
        assert!(tip.distance(Vec3::new(2.0, 1.0, 0.0)) < 1e-6);
    }

    #[test]
    fn cyclic_parents_become_roots() {
        let skeleton = Skeleton::new(vec![
            node("a", Some(1), Vec3::X),
            node("b", Some(0), Vec3::Y),
            node("c", Some(7), Vec3::Z),
        ]);
        let parents: Vec<_> = skeleton.nodes().iter().map(|n| n.parent).collect();
        assert_eq!(parents, vec![None, Some(0), None]);
        assert_eq!(skeleton.global_transforms(&skeleton.rest_pose()).len(), 3);
    }

    #[test]
    fn linear_channel_interpolates_between_keys() {
        let channel = Channel {
            node: 0,
            interpolation: Interpolation::Linear,
            times: vec![0.0, 2.0],
            values: ChannelValues::Translation(vec![Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)]),
        };
        let mut transform = NodeTransform::IDENTITY;
        channel.apply(0.5, &mut transform);
        assert!(transform.translation.distance(Vec3::new(1.0, 0.0, 0.0)) < 1e-6);
        channel.apply(10.0, &mut transform);
        assert_eq!(transform.translation, Vec3::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn step_channel_holds_previous_key() {
        let channel = Channel {
            node: 0,
            interpolation: Interpolation::Step,
            times: vec![0.0, 1.0],
            values: ChannelValues::Scale(vec![Vec3::ONE, Vec3::splat(3.0)]),
        };
        let mut transform = NodeTransform::IDENTITY;
        channel.apply(0.99, &mut transform);
        assert_eq!(transform.scale, Vec3::ONE);
        channel.apply(1.0, &mut transform);
        assert_eq!(transform.scale, Vec3::splat(3.0));
    }

    #[test]
    fn clip_sampling_wraps_around_duration() {
        let clip = AnimationClip::new(
            "spin",
            vec![Channel {
                node: 0,
                interpolation: Interpolation::Linear,
                times: vec![0.0, 1.0],
                values: ChannelValues::Rotation(vec![
                    Quat::IDENTITY,
                    Quat::from_rotation_y(FRAC_PI_2),
                ]),
            }],
        );
        assert_eq!(clip.duration(), 1.0);

        let mut first = [NodeTransform::IDENTITY];
        let mut wrapped = [NodeTransform::IDENTITY];
        clip.sample(0.25, &mut first);
        clip.sample(3.25, &mut wrapped);
        assert!(first[0].rotation.angle_between(wrapped[0].rotation) < 1e-4);
    }

    #[test]
    fn palette_cancels_bind_pose() {
        let skeleton = Skeleton::new(vec![
            node("root", None, Vec3::new(0.0, 1.0, 0.0)),
            node("arm", Some(0), Vec3::new(1.0, 0.0, 0.0)),
        ]);
        let rest = skeleton.global_transforms(&skeleton.rest_pose());
        let skin = Skin {
            joints: vec![0, 1],
            inverse_bind: rest.iter().map(Mat4::inverse).collect(),
        };
        for bone in skin.palette(&rest) {
            assert!(bone.abs_diff_eq(Mat4::IDENTITY, 1e-5));
        }
    }
}
