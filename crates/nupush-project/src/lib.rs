//! MSBuild project metadata reader for nupush.
//!
//! Reads the three `PropertyGroup` entries the publish pipeline cares
//! about — `PackageId`, `AssemblyName`, and `Version` — from a project
//! or solution-adjacent project file. The reader is a streaming state
//! machine; the first occurrence of each property wins, matching how
//! the properties are consumed downstream.

use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use nupush_types::PublishError;

/// The subset of project metadata used for package identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectMetadata {
    /// `Project/PropertyGroup/PackageId`
    pub package_id: Option<String>,
    /// `Project/PropertyGroup/AssemblyName`
    pub assembly_name: Option<String>,
    /// `Project/PropertyGroup/Version`
    pub version: Option<String>,
}

fn project_parse(path: &Path, detail: impl std::fmt::Display) -> PublishError {
    PublishError::ProjectParse {
        path: path.display().to_string(),
        detail: detail.to_string(),
    }
}

/// Load and parse a project file from disk.
pub fn load_project(path: &Path) -> Result<ProjectMetadata, PublishError> {
    let xml = std::fs::read_to_string(path).map_err(|e| project_parse(path, e))?;
    parse_project(&xml).map_err(|e| match e {
        PublishError::ProjectParse { detail, .. } => PublishError::ProjectParse {
            path: path.display().to_string(),
            detail,
        },
        other => other,
    })
}

/// Parse project XML. Properties are only read from the
/// `Project/PropertyGroup/...` path; anything else in the document is
/// ignored. Malformed XML fails with [`PublishError::ProjectParse`].
pub fn parse_project(xml: &str) -> Result<ProjectMetadata, PublishError> {
    let mut reader = Reader::from_str(xml);
    let mut metadata = ProjectMetadata::default();
    // Element-name path from the document root down to the cursor.
    let mut path: Vec<String> = Vec::new();

    let fail = |e: &dyn std::fmt::Display| PublishError::ProjectParse {
        path: "<inline>".to_string(),
        detail: e.to_string(),
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::End(_)) => {
                if path.pop().is_none() {
                    return Err(fail(&"unbalanced end tag"));
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.xml_content().map_err(|e| fail(&e))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if let [root, group, property] = path.as_slice()
                    && root == "Project"
                    && group == "PropertyGroup"
                {
                    let slot = match property.as_str() {
                        "PackageId" => &mut metadata.package_id,
                        "AssemblyName" => &mut metadata.assembly_name,
                        "Version" => &mut metadata.version,
                        _ => continue,
                    };
                    if slot.is_none() {
                        *slot = Some(text.to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(fail(&e)),
        }
    }

    if !path.is_empty() {
        return Err(fail(&"unclosed element"));
    }

    Ok(metadata)
}
