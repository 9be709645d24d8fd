//! Turns model files into [`ModelData`].

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glam::{Mat4, Quat, Vec3};
use gltf::animation::util::ReadOutputs;
use log::{info, warn};

use crate::animation::{
    AnimationClip, Channel, ChannelValues, Interpolation, Node, NodeTransform, Skeleton, Skin,
};
use crate::error::{EngineError, EngineResult};
use crate::mesh::{MaterialParams, MeshData, Vertex};
use crate::model::{ModelData, PrimitiveData};
use crate::obj;
use crate::texture::ImageData;

/// Loads an `.obj`, `.gltf` or `.glb` file.
pub fn load_model(path: &Path) -> EngineResult<ModelData> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let result = match extension.as_deref() {
        Some("obj") => obj::load_obj(path).map(|mesh| {
            let label = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("mesh");
            ModelData::from_mesh(label, mesh)
        }),
        Some("gltf" | "glb") => load_gltf(path),
        _ => Err(anyhow!("unsupported model format")),
    };
    result.map_err(|err| EngineError::asset(path, err))
}

pub fn load_gltf(path: &Path) -> Result<ModelData> {
    let (document, buffers, images) = gltf::import(path)
        .with_context(|| format!("failed to import glTF {}", path.display()))?;
    let buffer = |buffer: gltf::Buffer<'_>| buffers.get(buffer.index()).map(|data| &data.0[..]);

    let skeleton = Skeleton::new(read_nodes(&document));

    let mut primitives = Vec::new();
    for node in document.nodes() {
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let skin = node.skin().map(|skin| skin.index());
        for primitive in mesh.primitives() {
            if !matches!(primitive.mode(), gltf::mesh::Mode::Triangles) {
                warn!(
                    "{}: skipping non-triangle primitive {} of mesh {}",
                    path.display(),
                    primitive.index(),
                    mesh.index()
                );
                continue;
            }
            let label = format!(
                "{}-{}",
                mesh.name().unwrap_or("mesh"),
                primitive.index()
            );
            let data = read_primitive(&primitive, &buffer)
                .with_context(|| format!("invalid primitive {label}"))?;
            let pbr = primitive.material().pbr_metallic_roughness();
            primitives.push(PrimitiveData {
                label,
                mesh: data,
                node: node.index(),
                skin,
                material: MaterialParams {
                    roughness: pbr.roughness_factor(),
                    ..MaterialParams::default()
                },
                texture: pbr
                    .base_color_texture()
                    .map(|info| info.texture().source().index()),
            });
        }
    }

    let skins = document
        .skins()
        .map(|skin| {
            let joints: Vec<usize> = skin.joints().map(|joint| joint.index()).collect();
            let inverse_bind = skin
                .reader(buffer)
                .read_inverse_bind_matrices()
                .map(|matrices| matrices.map(|m| Mat4::from_cols_array_2d(&m)).collect())
                .unwrap_or_else(|| vec![Mat4::IDENTITY; joints.len()]);
            Skin {
                joints,
                inverse_bind,
            }
        })
        .collect();

    let clips = document
        .animations()
        .map(|animation| read_animation(&animation, &buffer))
        .collect();

    let images = images.iter().map(to_rgba).collect();

    let data = ModelData {
        skeleton,
        skins,
        clips,
        images,
        primitives,
    };
    info!(
        "loaded {}: {} primitives, {} skins, {} clips",
        path.display(),
        data.primitives.len(),
        data.skins.len(),
        data.clips.len()
    );
    Ok(data)
}

fn read_nodes(document: &gltf::Document) -> Vec<Node> {
    let mut nodes: Vec<Node> = document
        .nodes()
        .map(|node| {
            let (translation, rotation, scale) = node.transform().decomposed();
            Node {
                name: node.name().unwrap_or_default().to_string(),
                parent: None,
                rest: NodeTransform {
                    translation: Vec3::from_array(translation),
                    rotation: Quat::from_array(rotation),
                    scale: Vec3::from_array(scale),
                },
            }
        })
        .collect();
    for node in document.nodes() {
        for child in node.children() {
            if let Some(entry) = nodes.get_mut(child.index()) {
                entry.parent = Some(node.index());
            }
        }
    }
    nodes
}

fn read_primitive<'s, F>(primitive: &gltf::Primitive<'_>, buffer: &F) -> Result<MeshData>
where
    F: Clone + for<'b> Fn(gltf::Buffer<'b>) -> Option<&'s [u8]>,
{
    let reader = primitive.reader(buffer.clone());
    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| anyhow!("primitive has no positions"))?
        .collect();
    let normals: Vec<[f32; 3]> = reader
        .read_normals()
        .map(|iter| iter.collect())
        .unwrap_or_default();
    let texcoords: Vec<[f32; 2]> = reader
        .read_tex_coords(0)
        .map(|iter| iter.into_f32().collect())
        .unwrap_or_default();
    let joints: Vec<[u16; 4]> = reader
        .read_joints(0)
        .map(|iter| iter.into_u16().collect())
        .unwrap_or_default();
    let weights: Vec<[f32; 4]> = reader
        .read_weights(0)
        .map(|iter| iter.into_f32().collect())
        .unwrap_or_default();

    let vertices = positions
        .iter()
        .enumerate()
        .map(|(index, position)| Vertex {
            position: *position,
            normal: normals.get(index).copied().unwrap_or([0.0; 3]),
            texcoord: texcoords.get(index).copied().unwrap_or([0.0; 2]),
            joints: joints
                .get(index)
                .map(|j| j.map(u32::from))
                .unwrap_or([0; 4]),
            weights: weights.get(index).copied().unwrap_or([0.0; 4]),
        })
        .collect::<Vec<_>>();

    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..vertices.len() as u32).collect(),
    };
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
        return Err(anyhow!("index {bad} is out of range"));
    }

    let mut mesh = MeshData { vertices, indices };
    mesh.compute_missing_normals();
    Ok(mesh)
}

fn read_animation<'s, F>(animation: &gltf::Animation<'_>, buffer: &F) -> AnimationClip
where
    F: Clone + for<'b> Fn(gltf::Buffer<'b>) -> Option<&'s [u8]>,
{
    let name = animation
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("animation-{}", animation.index()));
    let mut channels = Vec::new();
    for channel in animation.channels() {
        let reader = channel.reader(buffer.clone());
        let (Some(inputs), Some(outputs)) = (reader.read_inputs(), reader.read_outputs()) else {
            continue;
        };
        let times: Vec<f32> = inputs.collect();
        let cubic = matches!(
            channel.sampler().interpolation(),
            gltf::animation::Interpolation::CubicSpline
        );
        let interpolation = match channel.sampler().interpolation() {
            gltf::animation::Interpolation::Step => Interpolation::Step,
            _ => Interpolation::Linear,
        };
        let values = match outputs {
            ReadOutputs::Translations(values) => {
                ChannelValues::Translation(keyframes(values.map(Vec3::from_array), cubic))
            }
            ReadOutputs::Rotations(values) => ChannelValues::Rotation(keyframes(
                values.into_f32().map(Quat::from_array),
                cubic,
            )),
            ReadOutputs::Scales(values) => {
                ChannelValues::Scale(keyframes(values.map(Vec3::from_array), cubic))
            }
            ReadOutputs::MorphTargetWeights(_) => {
                warn!("{name}: morph target animation is not supported");
                continue;
            }
        };
        channels.push(Channel {
            node: channel.target().node().index(),
            interpolation,
            times,
            values,
        });
    }
    AnimationClip::new(name, channels)
}

/// Cubic spline samplers store an in-tangent, value and out-tangent per
/// key; only the value is kept and the channel is played linearly.
fn keyframes<T>(values: impl Iterator<Item = T>, cubic: bool) -> Vec<T> {
    if cubic {
        values.skip(1).step_by(3).collect()
    } else {
        values.collect()
    }
}

fn to_rgba(image: &gltf::image::Data) -> ImageData {
    use gltf::image::Format;

    let pixels = match image.format {
        Format::R8G8B8A8 => image.pixels.clone(),
        Format::R8G8B8 => image
            .pixels
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
            .collect(),
        Format::R8G8 => image
            .pixels
            .chunks_exact(2)
            .flat_map(|rg| [rg[0], rg[1], 0, 255])
            .collect(),
        Format::R8 => image
            .pixels
            .iter()
            .flat_map(|&r| [r, r, r, 255])
            .collect(),
        other => {
            warn!("unsupported glTF image format {other:?}, using white");
            vec![255; (image.width * image.height * 4) as usize]
        }
    };
    ImageData {
        width: image.width,
        height: image.height,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn triangle_buffer() -> Vec<u8> {
        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let indices: [u16; 4] = [0, 1, 2, 0];
        let times: [f32; 2] = [0.0, 1.0];
        let translations: [f32; 6] = [0.0, 0.0, 0.0, 2.0, 0.0, 0.0];
        let mut bytes = Vec::new();
        bytes.extend_from_slice(bytemuck::cast_slice(&positions));
        // Three indices plus one padding slot keep the floats aligned.
        bytes.extend_from_slice(bytemuck::cast_slice(&indices));
        bytes.extend_from_slice(bytemuck::cast_slice(&times));
        bytes.extend_from_slice(bytemuck::cast_slice(&translations));
        bytes
    }

    const TRIANGLE_GLTF: &str = r#"{
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [
            { "name": "root", "translation": [0.0, 1.0, 0.0], "children": [1] },
            { "name": "tri", "mesh": 0 }
        ],
        "meshes": [{ "name": "tri", "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }],
        "animations": [{
            "name": "slide",
            "channels": [{ "sampler": 0, "target": { "node": 1, "path": "translation" } }],
            "samplers": [{ "input": 2, "output": 3, "interpolation": "LINEAR" }]
        }],
        "buffers": [{ "uri": "tri.bin", "byteLength": 76 }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6 },
            { "buffer": 0, "byteOffset": 44, "byteLength": 8 },
            { "buffer": 0, "byteOffset": 52, "byteLength": 24 }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
              "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" },
            { "bufferView": 2, "componentType": 5126, "count": 2, "type": "SCALAR",
              "min": [0.0], "max": [1.0] },
            { "bufferView": 3, "componentType": 5126, "count": 2, "type": "VEC3" }
        ]
    }"#;

    #[test]
    fn imports_hierarchy_geometry_and_animation() {
        let dir = tempdir().unwrap();
        let bytes = triangle_buffer();
        assert_eq!(bytes.len(), 76);
        std::fs::write(dir.path().join("tri.bin"), bytes).unwrap();
        let path = dir.path().join("tri.gltf");
        std::fs::write(&path, TRIANGLE_GLTF).unwrap();

        let data = load_model(&path).unwrap();
        assert_eq!(data.primitives.len(), 1);
        let primitive = &data.primitives[0];
        assert_eq!(primitive.mesh.indices, vec![0, 1, 2]);
        assert_eq!(primitive.node, 1);
        assert_eq!(primitive.mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(data.skeleton.nodes()[1].parent, Some(0));

        assert_eq!(data.clips.len(), 1);
        assert_eq!(data.clips[0].name(), "slide");
        assert_eq!(data.clips[0].duration(), 1.0);
    }

    #[test]
    fn obj_files_become_single_node_models() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tri.obj");
        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        let data = load_model(&path).unwrap();
        assert_eq!(data.primitives.len(), 1);
        assert_eq!(data.primitives[0].label, "tri");
        assert!(!data.is_animated());
    }

    #[test]
    fn unknown_extension_is_an_asset_error() {
        let err = load_model(Path::new("scene.fbx")).unwrap_err();
        assert!(matches!(err, EngineError::AssetLoad { .. }));
    }

    #[test]
    fn cubic_keyframes_keep_the_value() {
        let values = [1, 2, 3, 4, 5, 6];
        assert_eq!(keyframes(values.into_iter(), true), vec![2, 5]);
        assert_eq!(keyframes(values.into_iter(), false), values.to_vec());
    }
}
