use crate::{
    kinds::{ResourceId, ResourceKind, SoftwareContext},
    AssetKey, AssetType, Error, Result,
};

const STAGE_MARKER: &str = "#stage";

const DEFAULT_VERTEX: &str = "#version 430\n\nlayout(location = 0) in vec3 vertex;\n\nvoid main()\n{\n\tgl_Position = vec4(vertex, 1.0);\n}\n";
const DEFAULT_FRAGMENT: &str = "#version 430\n\nlayout (location = 0) out vec4 fragColor;\n\nvoid main()\n{\n\tfragColor = vec4(1.0f);\n}\n";

/// Source code of a vertex and a fragment stage stored in one file. Each stage starts with a
/// `#stage vertex` or `#stage fragment` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderAsset {
    pub vertex: String,
    pub fragment: String,
}

#[derive(Clone, Copy)]
enum Stage {
    Vertex,
    Fragment,
}

impl ShaderAsset {
    pub fn parse(text: &str) -> Result<Self> {
        let mut shader = ShaderAsset {
            vertex: String::new(),
            fragment: String::new(),
        };
        let mut stage = None;
        for line in text.lines() {
            if let Some(name) = line.trim().strip_prefix(STAGE_MARKER) {
                stage = match name.trim() {
                    "vertex" => Some(Stage::Vertex),
                    "fragment" => Some(Stage::Fragment),
                    other => return Err(Error::Decode(format!("unknown shader stage '{other}'"))),
                };
                continue;
            }
            let source = match stage {
                Some(Stage::Vertex) => &mut shader.vertex,
                Some(Stage::Fragment) => &mut shader.fragment,
                None if line.trim().is_empty() => continue,
                None => return Err(Error::Decode(format!("source before the first '{STAGE_MARKER}' line"))),
            };
            source.push_str(line);
            source.push('\n');
        }
        Ok(shader)
    }
}

impl AssetType for ShaderAsset {
    type Context = SoftwareContext;
    type Params = ();
    type Resource = ResourceId;

    const TYPE_TAG: &'static str = "shader";

    fn decode(bytes: &[u8], _params: &Self::Params) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|err| Error::Decode(err.to_string()))?;
        Self::parse(text)
    }

    fn commit(&self, _params: &Self::Params, context: &mut Self::Context) -> Result<Self::Resource> {
        if self.vertex.trim().is_empty() {
            return Err(Error::Decode("the vertex stage is empty".to_owned()));
        }
        if self.fragment.trim().is_empty() {
            return Err(Error::Decode("the fragment stage is empty".to_owned()));
        }
        Ok(context.allocate(ResourceKind::ShaderProgram, self.vertex.len() + self.fragment.len()))
    }

    fn fallback_key() -> AssetKey {
        AssetKey::new("shaders/default.glsl")
    }

    fn hardcoded_fallback() -> Self {
        Self {
            vertex: DEFAULT_VERTEX.to_owned(),
            fragment: DEFAULT_FRAGMENT.to_owned(),
        }
    }
}
