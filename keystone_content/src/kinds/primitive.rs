use crate::{
    kinds::{ResourceId, ResourceKind, SoftwareContext},
    AssetKey, AssetType, Error, Result,
};

/// Triangle list with positions and texture coordinates.
///
/// Stored as one vertex per line: `x y z` or `x y z u v`. Empty lines and lines starting with
/// `#` are skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveAsset {
    pub positions: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
}

impl PrimitiveAsset {
    pub fn parse(text: &str) -> Result<Self> {
        let mut positions = Vec::new();
        let mut uvs = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let values = line
                .split_whitespace()
                .map(str::parse::<f32>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|err| Error::Decode(format!("invalid number in line {}: {err}", index + 1)))?;
            match values.as_slice() {
                [x, y, z] => {
                    positions.push([*x, *y, *z]);
                    uvs.push([0.0, 0.0]);
                }
                [x, y, z, u, v] => {
                    positions.push([*x, *y, *z]);
                    uvs.push([*u, *v]);
                }
                _ => {
                    return Err(Error::Decode(format!(
                        "expected 3 or 5 numbers in line {} but found {}",
                        index + 1,
                        values.len()
                    )))
                }
            }
        }
        if positions.is_empty() {
            return Err(Error::Decode("the primitive has no vertices".to_owned()));
        }
        Ok(Self { positions, uvs })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

impl AssetType for PrimitiveAsset {
    type Context = SoftwareContext;
    type Params = ();
    type Resource = ResourceId;

    const TYPE_TAG: &'static str = "primitive";

    fn decode(bytes: &[u8], _params: &Self::Params) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|err| Error::Decode(err.to_string()))?;
        Self::parse(text)
    }

    fn commit(&self, _params: &Self::Params, context: &mut Self::Context) -> Result<Self::Resource> {
        let vertex_size = std::mem::size_of::<[f32; 3]>() + std::mem::size_of::<[f32; 2]>();
        Ok(context.allocate(ResourceKind::VertexBuffer, self.vertex_count() * vertex_size))
    }

    fn fallback_key() -> AssetKey {
        AssetKey::new("primitives/default.prim")
    }

    /// Quad that covers the range -1..1 in x and y.
    fn hardcoded_fallback() -> Self {
        Self {
            positions: vec![
                [-1.0, -1.0, 0.0],
                [1.0, -1.0, 0.0],
                [1.0, 1.0, 0.0],
                [-1.0, -1.0, 0.0],
                [1.0, 1.0, 0.0],
                [-1.0, 1.0, 0.0],
            ],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
        }
    }
}
