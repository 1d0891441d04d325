//! Project file serialization
//!
//! A project stores the feature list of every body, stored references
//! included. Loading adopts every persisted ShapeID before the first rebuild
//! so references keep their identities across sessions.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use rk_cad::CadKernel;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::body::Body;
use crate::config::NamingConfig;
use crate::document::Document;
use crate::error::{NamingError, NamingResult};
use crate::feature::{Feature, TopologyReferences};

pub const PROJECT_VERSION: u32 = 1;

/// A body as stored in a project file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectBody {
    pub id: Uuid,
    pub name: String,
    pub features: Vec<Feature>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ProjectBody {
    pub fn from_body(body: &Body) -> Self {
        Self {
            id: body.id,
            name: body.name.clone(),
            features: body.features().to_vec(),
            metadata: body.metadata().clone(),
        }
    }

    fn into_body(self) -> Body {
        let mut body = Body::with_id(self.id, self.name);
        for feature in self.features {
            body.push_feature(feature);
        }
        *body.metadata_mut() = self.metadata;
        body
    }
}

/// Serialization format for backward compatibility
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectData {
    version: u32,
    name: String,
    bodies: Vec<ProjectBody>,
}

/// Project file containing every body of a document
#[derive(Debug, Clone)]
pub struct Project {
    /// File format version
    pub version: u32,
    /// Project name
    pub name: String,
    /// Bodies keyed by ID, in insertion order
    bodies: HashMap<Uuid, ProjectBody>,
    order: Vec<Uuid>,
}

impl From<Project> for ProjectData {
    fn from(mut project: Project) -> Self {
        let bodies = project
            .order
            .iter()
            .filter_map(|id| project.bodies.remove(id))
            .collect();
        Self {
            version: project.version,
            name: project.name,
            bodies,
        }
    }
}

impl From<ProjectData> for Project {
    fn from(data: ProjectData) -> Self {
        let mut project = Project::new(data.name);
        project.version = data.version;
        for body in data.bodies {
            project.add_body(body);
        }
        project
    }
}

impl Serialize for Project {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let data = ProjectData {
            version: self.version,
            name: self.name.clone(),
            bodies: self.bodies_iter().cloned().collect(),
        };
        data.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Project {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let data = ProjectData::deserialize(deserializer)?;
        Ok(Project::from(data))
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new("New Project")
    }
}

impl Project {
    /// Create a new empty project
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: PROJECT_VERSION,
            name: name.into(),
            bodies: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Capture every body of a document
    pub fn from_document(name: impl Into<String>, doc: &Document) -> Self {
        let mut project = Self::new(name);
        for body in doc.bodies() {
            project.add_body(ProjectBody::from_body(body));
        }
        project
    }

    /// Save project to a file
    pub fn save(&self, path: impl AsRef<Path>) -> NamingResult<()> {
        let path = path.as_ref();
        let content = self.to_bytes()?;
        std::fs::write(path, content).map_err(|e| NamingError::Io(e.to_string()))?;
        tracing::info!("Saved project {} to {}", self.name, path.display());
        Ok(())
    }

    /// Serialize project to bytes
    pub fn to_bytes(&self) -> NamingResult<Vec<u8>> {
        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| NamingError::Serialize(e.to_string()))?;
        Ok(content.into_bytes())
    }

    /// Load project from a file
    pub fn load(path: impl AsRef<Path>) -> NamingResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| NamingError::Io(e.to_string()))?;
        let project: Project =
            ron::from_str(&content).map_err(|e| NamingError::Deserialize(e.to_string()))?;
        project.check_version()?;
        Ok(project)
    }

    /// Load project from bytes
    pub fn load_from_bytes(data: &[u8]) -> NamingResult<Self> {
        let content =
            std::str::from_utf8(data).map_err(|e| NamingError::Deserialize(e.to_string()))?;
        let project: Project =
            ron::from_str(content).map_err(|e| NamingError::Deserialize(e.to_string()))?;
        project.check_version()?;
        Ok(project)
    }

    fn check_version(&self) -> NamingResult<()> {
        if self.version > PROJECT_VERSION {
            return Err(NamingError::Deserialize(format!(
                "project version {} is newer than supported version {}",
                self.version, PROJECT_VERSION
            )));
        }
        Ok(())
    }

    /// Build a document from this project
    ///
    /// Persisted ShapeIDs are adopted into the registry first, then every
    /// body is rebuilt. A body whose rebuild fails is left unbuilt; the
    /// document is still returned.
    pub fn into_document(self, kernel: Arc<dyn CadKernel>, config: NamingConfig) -> NamingResult<Document> {
        config.validate()?;
        let mut doc = Document::with_config(kernel, config);
        let data = ProjectData::from(self);

        for stored in data.bodies {
            let body = stored.into_body();
            let body_id = body.id;
            let mut adopted = 0;
            for feature in body.features() {
                for (_, refs) in feature.references() {
                    for id in &refs.shape_ids {
                        if doc.naming().adopt(body_id, id) {
                            adopted += 1;
                        }
                    }
                }
            }
            tracing::debug!("Adopted {} identities for body {}", adopted, body.name);

            doc.insert_body(body);
            let report = doc.rebuild(body_id)?;
            if !report.is_ok() {
                tracing::warn!("Body {} left unbuilt after load", body_id);
            }
        }
        Ok(doc)
    }

    // ============== Body Accessors ==============

    /// Add a body, replacing any body with the same ID
    pub fn add_body(&mut self, body: ProjectBody) -> Uuid {
        let id = body.id;
        if self.bodies.insert(id, body).is_none() {
            self.order.push(id);
        }
        id
    }

    pub fn get_body(&self, id: Uuid) -> Option<&ProjectBody> {
        self.bodies.get(&id)
    }

    /// Iterate over all bodies in insertion order
    pub fn bodies_iter(&self) -> impl Iterator<Item = &ProjectBody> {
        self.order.iter().filter_map(|id| self.bodies.get(id))
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureOp;
    use crate::naming::ResolutionMethod;
    use crate::resolve::ReferenceSet;
    use crate::shape_id::{FeatureId, ShapeKind};
    use crate::test_support::{box_document, init_tracing};
    use glam::Vec3;
    use rk_cad::PolyKernel;

    #[test]
    fn test_box_fillet_save_load_edit() {
        init_tracing();
        let kernel: Arc<dyn CadKernel> = Arc::new(PolyKernel::new());
        let mut doc = Document::new(kernel.clone());
        let body_id = doc.add_body("Body");
        doc.add_feature(
            body_id,
            Feature::block("Box", Vec3::splat(5.0), Vec3::splat(10.0)).with_id("Box"),
        )
        .unwrap();
        let outcome = doc
            .add_feature(
                body_id,
                Feature::fillet("Fillet", ReferenceSet::from_indices([0, 1, 2, 3]), 1.0)
                    .with_id("Fillet"),
            )
            .unwrap();
        assert!(outcome.is_applied());

        let fillet = FeatureId::from("Fillet");
        let uuids = |doc: &Document| -> Vec<Uuid> {
            doc.body(body_id)
                .unwrap()
                .feature(&fillet)
                .unwrap()
                .shape_ids(ShapeKind::Edge)
                .iter()
                .map(|id| id.uuid)
                .collect()
        };
        let saved = uuids(&doc);
        assert_eq!(saved.len(), 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ron");
        Project::from_document("Model", &doc).save(&path).unwrap();

        let project = Project::load(&path).unwrap();
        assert_eq!(project.body_count(), 1);
        let mut doc = project
            .into_document(kernel, NamingConfig::default())
            .unwrap();
        assert_eq!(uuids(&doc), saved);
        assert!(doc.health_report(body_id).unwrap().is_ok());

        let outcome = doc
            .edit_feature(body_id, &fillet, |feature| {
                if let FeatureOp::Fillet { radius, .. } = &mut feature.op {
                    *radius = 1.5;
                }
            })
            .unwrap();
        assert!(outcome.is_applied());

        let methods = outcome.report().unwrap().methods_of(&fillet, ShapeKind::Edge);
        assert_eq!(methods.len(), 4);
        assert!(
            methods
                .iter()
                .all(|m| matches!(m, ResolutionMethod::Index | ResolutionMethod::Direct))
        );
        let body = doc.body(body_id).unwrap();
        assert_eq!(body.feature(&fillet).unwrap().indices(ShapeKind::Edge), &[0, 1, 2, 3]);
        assert_eq!(uuids(&doc), saved);
    }

    #[test]
    fn test_bytes_keep_body_order() {
        let (mut doc, first) = box_document();
        let second = doc.add_body("Second");
        doc.body_mut(second)
            .unwrap()
            .metadata_mut()
            .insert(String::from("material"), String::from("steel"));

        let mut project = Project::new("Model");
        project.add_body(ProjectBody::from_body(doc.body(second).unwrap()));
        project.add_body(ProjectBody::from_body(doc.body(first).unwrap()));

        let loaded = Project::load_from_bytes(&project.to_bytes().unwrap()).unwrap();
        let order: Vec<Uuid> = loaded.bodies_iter().map(|b| b.id).collect();
        assert_eq!(order, vec![second, first]);
        let stored = loaded.get_body(second).unwrap();
        assert_eq!(stored.metadata.get("material").map(String::as_str), Some("steel"));
        assert_eq!(loaded.get_body(first).unwrap().features, doc.body(first).unwrap().features());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            Project::load_from_bytes(&[0xff, 0xfe]),
            Err(NamingError::Deserialize(_))
        ));
        assert!(matches!(
            Project::load_from_bytes(b"(version: 99, name: \"x\", bodies: [])"),
            Err(NamingError::Deserialize(_))
        ));
        assert!(matches!(
            Project::load("/nonexistent/model.ron"),
            Err(NamingError::Io(_))
        ));
    }
}
