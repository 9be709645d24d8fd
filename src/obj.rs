//! Wavefront OBJ import.

use std::collections::HashMap;
use std::path::Path;
use std::str::SplitWhitespace;

use anyhow::{anyhow, bail, Context, Result};
use glam::{Vec2, Vec3};

use crate::mesh::{MeshData, Vertex};

pub fn load_obj(path: &Path) -> Result<MeshData> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    load_obj_from_str(&data).with_context(|| format!("failed to parse OBJ {}", path.display()))
}

/// Parses an OBJ document into an indexed triangle list.
///
/// Polygons are fanned into triangles. Vertices without a normal get a
/// smoothed one computed from the surrounding faces.
pub fn load_obj_from_str(data: &str) -> Result<MeshData> {
    let mut document = ObjDocument::default();
    for (number, line) in data.lines().enumerate() {
        document
            .read_line(line)
            .with_context(|| format!("line {}", number + 1))?;
    }
    document.into_mesh()
}

/// One `v/vt/vn` reference of a face, already resolved to zero-based
/// indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Corner {
    position: usize,
    texcoord: Option<usize>,
    normal: Option<usize>,
}

#[derive(Debug, Default)]
struct ObjDocument {
    positions: Vec<Vec3>,
    texcoords: Vec<Vec2>,
    normals: Vec<Vec3>,
    triangles: Vec<[Corner; 3]>,
}

impl ObjDocument {
    fn read_line(&mut self, line: &str) -> Result<()> {
        let line = line.split('#').next().unwrap_or_default();
        let mut words = line.split_whitespace();
        match words.next() {
            Some("v") => {
                let [x, y, z] = floats::<3>(&mut words, 3).context("invalid vertex")?;
                self.positions.push(Vec3::new(x, y, z));
            }
            Some("vt") => {
                let [u, v] = floats::<2>(&mut words, 1).context("invalid texture coordinate")?;
                self.texcoords.push(Vec2::new(u, v));
            }
            Some("vn") => {
                let [x, y, z] = floats::<3>(&mut words, 3).context("invalid normal")?;
                self.normals.push(Vec3::new(x, y, z));
            }
            Some("f") => {
                let corners = words
                    .map(|word| self.corner(word))
                    .collect::<Result<Vec<_>>>()
                    .context("invalid face")?;
                if corners.len() < 3 {
                    bail!("faces must reference at least 3 vertices");
                }
                for pair in corners[1..].windows(2) {
                    self.triangles.push([corners[0], pair[0], pair[1]]);
                }
            }
            // Groups, materials and smoothing are not needed for rendering.
            _ => {}
        }
        Ok(())
    }

    fn corner(&self, word: &str) -> Result<Corner> {
        let mut parts = word.split('/');
        let position = parts
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| anyhow!("missing vertex index in `{word}`"))?;
        let position = resolve(position.parse()?, self.positions.len())
            .ok_or_else(|| anyhow!("vertex index {position} is out of range"))?;
        let mut optional = |len: usize| -> Result<Option<usize>> {
            match parts.next() {
                Some(part) if !part.is_empty() => Ok(resolve(part.parse()?, len)),
                _ => Ok(None),
            }
        };
        let texcoord = optional(self.texcoords.len())?;
        let normal = optional(self.normals.len())?;
        Ok(Corner {
            position,
            texcoord,
            normal,
        })
    }

    fn into_mesh(self) -> Result<MeshData> {
        if self.positions.is_empty() {
            bail!("OBJ file does not define any vertices");
        }
        let mut mesh = MeshData::default();
        let mut shared: HashMap<Corner, u32> = HashMap::new();
        for corner in self.triangles.iter().flatten() {
            let index = *shared.entry(*corner).or_insert_with(|| {
                mesh.vertices.push(Vertex::new(
                    self.positions[corner.position],
                    corner.normal.map_or(Vec3::ZERO, |i| self.normals[i]),
                    corner.texcoord.map_or(Vec2::ZERO, |i| self.texcoords[i]),
                ));
                (mesh.vertices.len() - 1) as u32
            });
            mesh.indices.push(index);
        }
        mesh.compute_missing_normals();
        Ok(mesh)
    }
}

/// Reads up to `N` floats, requiring at least `required`. Missing trailing
/// components are zero.
fn floats<const N: usize>(words: &mut SplitWhitespace<'_>, required: usize) -> Result<[f32; N]> {
    let mut out = [0.0; N];
    for (slot, value) in out.iter_mut().enumerate() {
        match words.next() {
            Some(word) => *value = word.parse()?,
            None if slot < required => bail!("expected {required} components, found {slot}"),
            None => break,
        }
    }
    Ok(out)
}

/// Resolves a one-based or negative (relative to the end) OBJ index.
fn resolve(index: i64, len: usize) -> Option<usize> {
    match index {
        0 => None,
        i if i > 0 => Some(i as usize - 1).filter(|&i| i < len),
        i => len.checked_sub(i.unsigned_abs() as usize),
    }
}
