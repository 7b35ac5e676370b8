//! Reading and writing the XML parts of a 3MF package.

use std::fmt::{self, Write};

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use roxmltree::{Document, Node};

use crate::color::Rgba;
use crate::mesh::MeshObject;
use crate::package::MergedPackage;

pub const MODEL_PART: &str = "3D/3dmodel.model";
pub const RELS_PART: &str = "_rels/.rels";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const SLICER_CONFIG_PART: &str = "Metadata/model_settings.config";

const CORE_NS: &str = "http://schemas.microsoft.com/3dmanufacturing/core/2015/02";
const MATERIAL_NS: &str = "http://schemas.microsoft.com/3dmanufacturing/material/2015/02";
const MODEL_REL_TYPE: &str = "http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel";

pub const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
 <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
 <Default Extension="model" ContentType="application/vnd.ms-package.3dmanufacturing-3dmodel+xml"/>
 <Default Extension="config" ContentType="application/xml"/>
</Types>
"#;

pub fn rels_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
 <Relationship Target="/{MODEL_PART}" Id="rel0" Type="{MODEL_REL_TYPE}"/>
</Relationships>
"#
    )
}

/// Returns the zip entry name of the model part declared in `_rels/.rels`.
pub fn model_part_from_rels(xml: &str) -> Result<Option<String>> {
    let document = Document::parse(xml).context("invalid package relationships XML")?;
    Ok(document
        .descendants()
        .filter(|n| n.has_tag_name("Relationship"))
        .find(|n| n.attribute("Type") == Some(MODEL_REL_TYPE))
        .and_then(|n| n.attribute("Target"))
        .map(|target| target.trim_start_matches('/').to_string()))
}

/// Parses every `<object>` that carries a `<mesh>` in a 3MF model part.
///
/// Objects built from components are not meshes and are skipped, as are any
/// material resources.
pub fn parse_meshes(xml: &str) -> Result<Vec<MeshObject>> {
    let document = Document::parse(xml).context("invalid 3MF model XML")?;
    let mut meshes = Vec::new();

    for object in document.descendants().filter(|n| n.has_tag_name("object")) {
        let Some(mesh) = object.children().find(|n| n.has_tag_name("mesh")) else {
            continue;
        };
        let id = object.attribute("id").unwrap_or("?");

        let mut vertices = Vec::new();
        for vertex in mesh.descendants().filter(|n| n.has_tag_name("vertex")) {
            vertices.push(
                parse_vertex(&vertex).with_context(|| format!("invalid vertex in object {id}"))?,
            );
        }
        let mut triangles = Vec::new();
        for triangle in mesh.descendants().filter(|n| n.has_tag_name("triangle")) {
            triangles.push(
                parse_triangle(&triangle)
                    .with_context(|| format!("invalid triangle in object {id}"))?,
            );
        }

        let mut parsed = MeshObject::new(vertices, triangles);
        parsed.name = object.attribute("name").map(str::to_string);
        meshes.push(parsed);
    }

    Ok(meshes)
}

fn parse_vertex(node: &Node<'_, '_>) -> Result<Vec3> {
    Ok(Vec3::new(
        parse_attr(node, "x")?,
        parse_attr(node, "y")?,
        parse_attr(node, "z")?,
    ))
}

fn parse_triangle(node: &Node<'_, '_>) -> Result<[u32; 3]> {
    Ok([
        parse_attr(node, "v1")?,
        parse_attr(node, "v2")?,
        parse_attr(node, "v3")?,
    ])
}

fn parse_attr<T>(node: &Node<'_, '_>, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value = node
        .attribute(name)
        .ok_or_else(|| anyhow!("missing attribute {name}"))?;
    value
        .trim()
        .parse::<T>()
        .map_err(|err| anyhow!("attribute {name}={value:?}: {err}"))
}

/// Writes the model part of a merged package.
pub fn write_model(package: &MergedPackage, out: &mut String) -> fmt::Result {
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        out,
        r#"<model unit="millimeter" xml:lang="en-US" xmlns="{CORE_NS}" xmlns:m="{MATERIAL_NS}">"#
    )?;
    writeln!(out, " <resources>")?;

    let group_id = package.material_group_id();
    if !package.materials().is_empty() {
        writeln!(out, r#"  <m:colorgroup id="{group_id}">"#)?;
        for rgba in package.materials() {
            writeln!(out, r#"   <m:color color="{}"/>"#, color_attr(*rgba))?;
        }
        writeln!(out, "  </m:colorgroup>")?;
    }

    for object in package.objects() {
        writeln!(
            out,
            r#"  <object id="{}" type="model" name="{}" pid="{group_id}" pindex="{}">"#,
            object.id,
            escape_attr(&object.name),
            object.material
        )?;
        writeln!(out, "   <mesh>")?;
        writeln!(out, "    <vertices>")?;
        for v in &object.mesh.vertices {
            writeln!(out, r#"     <vertex x="{}" y="{}" z="{}"/>"#, v.x, v.y, v.z)?;
        }
        writeln!(out, "    </vertices>")?;
        writeln!(out, "    <triangles>")?;
        for [v1, v2, v3] in &object.mesh.triangles {
            writeln!(out, r#"     <triangle v1="{v1}" v2="{v2}" v3="{v3}"/>"#)?;
        }
        writeln!(out, "    </triangles>")?;
        writeln!(out, "   </mesh>")?;
        writeln!(out, "  </object>")?;
    }

    if let Some(assembly) = package.assembly_id() {
        writeln!(out, r#"  <object id="{assembly}" type="model">"#)?;
        writeln!(out, "   <components>")?;
        for id in package.build_item_refs() {
            writeln!(out, r#"    <component objectid="{id}"/>"#)?;
        }
        writeln!(out, "   </components>")?;
        writeln!(out, "  </object>")?;
    }
    writeln!(out, " </resources>")?;

    writeln!(out, " <build>")?;
    if let Some(assembly) = package.assembly_id() {
        writeln!(out, r#"  <item objectid="{assembly}"/>"#)?;
    }
    writeln!(out, " </build>")?;
    writeln!(out, "</model>")
}

/// Writes the per-part naming metadata read by Bambu Studio and OrcaSlicer.
///
/// Returns `false` without writing anything when the package is empty.
pub fn write_slicer_config(package: &MergedPackage, out: &mut String) -> Result<bool, fmt::Error> {
    let Some(assembly) = package.assembly_id() else {
        return Ok(false);
    };
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(out, "<config>")?;
    writeln!(out, r#"  <object id="{assembly}">"#)?;
    for object in package.objects() {
        writeln!(out, r#"    <part id="{}" subtype="normal_part">"#, object.id)?;
        writeln!(
            out,
            r#"      <metadata key="name" value="{}"/>"#,
            escape_attr(&object.name)
        )?;
        writeln!(out, "    </part>")?;
    }
    writeln!(out, "  </object>")?;
    writeln!(out, "</config>")?;
    Ok(true)
}

/// 3MF colors are `#RRGGBBAA` in sRGB.
fn color_attr(rgba: Rgba) -> String {
    let [r, g, b, a] = rgba.to_bytes();
    format!("#{r:02X}{g:02X}{b:02X}{a:02X}")
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Structural summary of a model part: what was defined and what references
/// what.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageLayout {
    pub mesh_objects: Vec<LayoutObject>,
    pub colors: Vec<String>,
    pub components: Vec<u32>,
    pub build_items: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutObject {
    pub id: u32,
    pub name: Option<String>,
    pub pid: Option<u32>,
    pub pindex: Option<u32>,
    pub triangles: usize,
}

pub fn parse_layout(xml: &str) -> Result<PackageLayout> {
    let document = Document::parse(xml).context("invalid 3MF model XML")?;
    let mut layout = PackageLayout::default();

    for node in document.descendants().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            "object" if node.children().any(|n| n.has_tag_name("mesh")) => {
                layout.mesh_objects.push(LayoutObject {
                    id: parse_attr(&node, "id")?,
                    name: node.attribute("name").map(str::to_string),
                    pid: node.attribute("pid").and_then(|v| v.parse().ok()),
                    pindex: node.attribute("pindex").and_then(|v| v.parse().ok()),
                    triangles: node
                        .descendants()
                        .filter(|n| n.has_tag_name("triangle"))
                        .count(),
                });
            }
            "color" if node.parent().is_some_and(|p| p.has_tag_name("colorgroup")) => {
                layout
                    .colors
                    .push(node.attribute("color").unwrap_or_default().to_string());
            }
            "component" => layout.components.push(parse_attr(&node, "objectid")?),
            "item" => layout.build_items.push(parse_attr(&node, "objectid")?),
            _ => {}
        }
    }

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_OBJECT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<model unit="millimeter" xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02">
  <resources>
    <object id="1" type="model">
      <mesh>
        <vertices>
          <vertex x="0" y="0" z="0"/>
          <vertex x="10" y="0" z="0"/>
          <vertex x="0" y="10.5" z="0"/>
        </vertices>
        <triangles>
          <triangle v1="0" v2="1" v3="2"/>
        </triangles>
      </mesh>
    </object>
  </resources>
  <build>
    <item objectid="1"/>
  </build>
</model>
"#;

    fn triangle() -> MeshObject {
        MeshObject::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![[0, 1, 2]])
    }

    #[test]
    fn parses_mesh_objects() {
        let meshes = parse_meshes(SINGLE_OBJECT).unwrap();
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].vertices[2], Vec3::new(0.0, 10.5, 0.0));
        assert_eq!(meshes[0].triangles, vec![[0, 1, 2]]);
    }

    #[test]
    fn bad_vertex_is_an_error() {
        let broken = SINGLE_OBJECT.replace(r#"x="10""#, r#"x="ten""#);
        let err = parse_meshes(&broken).unwrap_err();
        assert!(format!("{err:#}").contains("invalid vertex in object 1"));
    }

    #[test]
    fn written_model_round_trips_geometry_and_layout() {
        let mut package = MergedPackage::new();
        package.add_object("red", Rgba::new(1.0, 0.0, 0.0, 1.0), triangle());
        package.add_object("a&b", Rgba::new(0.0, 0.0, 1.0, 0.5), triangle());
        package.add_object("#f00", Rgba::new(1.0, 0.0, 0.0, 1.0), triangle());

        let mut xml = String::new();
        write_model(&package, &mut xml).unwrap();

        let meshes = parse_meshes(&xml).unwrap();
        assert_eq!(meshes.len(), 3);
        assert_eq!(meshes[1].name.as_deref(), Some("a&b"));
        assert_eq!(meshes[0].vertices, triangle().vertices);

        let layout = parse_layout(&xml).unwrap();
        let ids: Vec<u32> = layout.mesh_objects.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        let pindex: Vec<Option<u32>> = layout.mesh_objects.iter().map(|o| o.pindex).collect();
        assert_eq!(pindex, vec![Some(0), Some(1), Some(0)]);
        assert!(layout.mesh_objects.iter().all(|o| o.pid == Some(4)));
        assert_eq!(layout.colors, vec!["#FF0000FF", "#0000FF80"]);
        assert_eq!(layout.components, vec![1, 2, 3]);
        assert_eq!(layout.build_items, vec![5]);
    }

    #[test]
    fn empty_package_has_no_build_items() {
        let package = MergedPackage::new();
        let mut xml = String::new();
        write_model(&package, &mut xml).unwrap();
        let layout = parse_layout(&xml).unwrap();
        assert_eq!(layout, PackageLayout::default());

        let mut config = String::new();
        assert!(!write_slicer_config(&package, &mut config).unwrap());
        assert!(config.is_empty());
    }

    #[test]
    fn slicer_config_names_every_part() {
        let mut package = MergedPackage::new();
        package.add_object("red \"x\"", Rgba::new(1.0, 0.0, 0.0, 1.0), triangle());
        let mut config = String::new();
        assert!(write_slicer_config(&package, &mut config).unwrap());
        let document = Document::parse(&config).unwrap();
        let object = document
            .descendants()
            .find(|n| n.has_tag_name("object"))
            .unwrap();
        assert_eq!(object.attribute("id"), Some("3"));
        let name = document
            .descendants()
            .find(|n| n.has_tag_name("metadata"))
            .and_then(|n| n.attribute("value"));
        assert_eq!(name, Some("red \"x\""));
    }

    #[test]
    fn rels_point_at_model_part() {
        assert_eq!(
            model_part_from_rels(&rels_xml()).unwrap().as_deref(),
            Some(MODEL_PART)
        );
    }
}
