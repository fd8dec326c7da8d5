use crate::error::{DapError, Result};
use crate::model::{Attribute, Chunk, ChunkLayout, DataType, Dataset, Dimension, Variable};
use crate::DMRPP_NAMESPACE;

type Node<'a, 'i> = roxmltree::Node<'a, 'i>;

/// Read a metadata or chunk-index document back into a [`Dataset`].
///
/// Chunk layouts are populated only when the document carries them. Unknown
/// elements in other namespaces are ignored.
pub fn parse_metadata(text: &str) -> Result<Dataset> {
    let doc = roxmltree::Document::parse(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "Dataset" {
        return Err(DapError::UnexpectedRoot {
            found: root.tag_name().name().to_owned(),
        });
    }

    let mut dataset = Dataset::new(required_attr(&root, "name")?);
    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "Dimension" => {
                let name = required_attr(&child, "name")?;
                let size = parse_u64(&child, required_attr(&child, "size")?)?;
                dataset.dimensions.push(Dimension::new(name, size));
            }
            "Attribute" => dataset.attributes.push(parse_attribute(&child)?),
            _ if child.tag_name().namespace() == Some(DMRPP_NAMESPACE) => {}
            type_name => dataset.variables.push(parse_variable(&child, type_name)?),
        }
    }

    dataset.check_dimensions()?;
    Ok(dataset)
}

fn parse_variable(node: &Node<'_, '_>, type_name: &str) -> Result<Variable> {
    let data_type: DataType = type_name.parse()?;
    let mut var = Variable::new(required_attr(node, "name")?, data_type);

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "Dim" => {
                let name = required_attr(&child, "name")?;
                var.dims
                    .push(name.strip_prefix('/').unwrap_or(name).to_owned());
            }
            "Attribute" => var.attributes.push(parse_attribute(&child)?),
            "chunks" if child.tag_name().namespace() == Some(DMRPP_NAMESPACE) => {
                var.chunks = Some(parse_chunk_layout(&child)?);
            }
            _ => {}
        }
    }

    Ok(var)
}

fn parse_attribute(node: &Node<'_, '_>) -> Result<Attribute> {
    let name = required_attr(node, "name")?;
    let data_type: DataType = required_attr(node, "type")?.parse()?;
    let values = node
        .children()
        .filter(|n| n.is_element() && n.has_tag_name("Value"))
        .map(|n| n.text().unwrap_or_default().to_owned());
    Ok(Attribute::new(name, data_type, values))
}

fn parse_chunk_layout(node: &Node<'_, '_>) -> Result<ChunkLayout> {
    let mut layout = ChunkLayout::default();
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "chunkDimensionSizes" => {
                layout.chunk_shape = child
                    .text()
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(|v| parse_u64(&child, v))
                    .collect::<Result<_>>()?;
            }
            "chunk" => {
                let position = required_attr(&child, "chunkPositionInArray")?;
                let position = position
                    .trim()
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| parse_u64(&child, v))
                    .collect::<Result<_>>()?;
                layout.chunks.push(Chunk {
                    offset: parse_u64(&child, required_attr(&child, "offset")?)?,
                    size: parse_u64(&child, required_attr(&child, "nBytes")?)?,
                    position,
                });
            }
            _ => {}
        }
    }
    Ok(layout)
}

fn required_attr<'a>(node: &Node<'a, '_>, attribute: &'static str) -> Result<&'a str> {
    node.attribute(attribute)
        .ok_or_else(|| DapError::MissingAttribute {
            element: node.tag_name().name().to_owned(),
            attribute,
        })
}

fn parse_u64(node: &Node<'_, '_>, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| DapError::InvalidNumber {
        element: node.tag_name().name().to_owned(),
        value: value.to_owned(),
    })
}
