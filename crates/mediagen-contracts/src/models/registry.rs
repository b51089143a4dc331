use indexmap::IndexMap;

/// What a model is used for. Each generator variant asks for exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ImageEdit,
    ImageExperimental,
    ImageBatch,
    Video,
    Text,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageEdit => "image-edit",
            Self::ImageExperimental => "image-experimental",
            Self::ImageBatch => "image-batch",
            Self::Video => "video",
            Self::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub family: String,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Known model ids. Insertion order matters: the first model for a
/// capability is that capability's default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim().trim_start_matches("models/"))
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, family: &str, capabilities: &[Capability]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                family: family.to_string(),
                capabilities: capabilities.to_vec(),
            },
        );
    };

    insert("gemini-2.5-flash-image", "gemini", &[Capability::ImageEdit]);
    insert(
        "gemini-3-pro-image-preview",
        "gemini",
        &[Capability::ImageExperimental, Capability::ImageEdit],
    );
    insert("imagen-4.0-generate-001", "imagen", &[Capability::ImageBatch]);
    insert(
        "imagen-4.0-ultra-generate-001",
        "imagen",
        &[Capability::ImageBatch],
    );
    insert(
        "imagen-4.0-fast-generate-001",
        "imagen",
        &[Capability::ImageBatch],
    );
    insert("veo-3.1-generate-preview", "veo", &[Capability::Video]);
    insert("veo-3.1-fast-generate-preview", "veo", &[Capability::Video]);
    insert("veo-3.0-generate-001", "veo", &[Capability::Video]);
    insert("gemini-2.5-flash", "gemini", &[Capability::Text]);
    insert("gemini-2.5-pro", "gemini", &[Capability::Text]);

    map
}
