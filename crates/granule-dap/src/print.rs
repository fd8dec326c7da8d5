use crate::error::DapError;
use crate::model::{Attribute, ChunkLayout, Dataset, Variable};
use crate::{DAP4_NAMESPACE, DMRPP_NAMESPACE};
use std::io::{self, Write};

const INDENT: &str = "    ";

/// Print the DAP2 structure listing.
pub fn print_schema<W: Write + ?Sized>(dataset: &Dataset, out: &mut W) -> io::Result<()> {
    writeln!(out, "Dataset {{")?;
    for var in &dataset.variables {
        write!(out, "{INDENT}{} {}", var.data_type, var.name)?;
        for dim in &var.dims {
            let shared = dataset.dimension(dim).ok_or_else(|| {
                invalid(DapError::UnknownDimension {
                    variable: var.name.clone(),
                    dimension: dim.clone(),
                })
            })?;
            write!(out, "[{} = {}]", shared.name, shared.size)?;
        }
        writeln!(out, ";")?;
    }
    writeln!(out, "}} {};", dataset.name)
}

/// Print the DAP2 attribute listing.
///
/// Global attributes go in an `NC_GLOBAL` container; every variable gets a
/// container even when it has no attributes.
pub fn print_attributes<W: Write + ?Sized>(dataset: &Dataset, out: &mut W) -> io::Result<()> {
    writeln!(out, "Attributes {{")?;
    if !dataset.attributes.is_empty() {
        print_attribute_table(out, "NC_GLOBAL", &dataset.attributes)?;
    }
    for var in &dataset.variables {
        print_attribute_table(out, &var.name, &var.attributes)?;
    }
    writeln!(out, "}}")
}

fn print_attribute_table<W: Write + ?Sized>(
    out: &mut W,
    name: &str,
    attributes: &[Attribute],
) -> io::Result<()> {
    writeln!(out, "{INDENT}{name} {{")?;
    for attr in attributes {
        write!(out, "{INDENT}{INDENT}{} {} ", attr.data_type, attr.name)?;
        for (idx, value) in attr.values.iter().enumerate() {
            if idx > 0 {
                out.write_all(b", ")?;
            }
            if attr.data_type.is_textual() {
                write!(out, "\"{}\"", escape_quoted(value))?;
            } else {
                out.write_all(value.as_bytes())?;
            }
        }
        writeln!(out, ";")?;
    }
    writeln!(out, "{INDENT}}}")
}

/// Print the DAP4 XML description.
pub fn print_metadata<W: Write + ?Sized>(dataset: &Dataset, out: &mut W) -> io::Result<()> {
    print_xml(dataset, out, false)
}

/// Print the DAP4 XML description with each variable's chunk layout.
pub fn print_chunk_index<W: Write + ?Sized>(dataset: &Dataset, out: &mut W) -> io::Result<()> {
    print_xml(dataset, out, true)
}

fn print_xml<W: Write + ?Sized>(dataset: &Dataset, out: &mut W, chunks: bool) -> io::Result<()> {
    dataset.check_dimensions().map_err(invalid)?;
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    write!(out, r#"<Dataset xmlns="{DAP4_NAMESPACE}""#)?;
    if chunks {
        write!(out, r#" xmlns:dmrpp="{DMRPP_NAMESPACE}""#)?;
    }
    writeln!(
        out,
        r#" dapVersion="4.0" dmrVersion="1.0" name="{}">"#,
        escape_xml(&dataset.name)
    )?;

    for dim in &dataset.dimensions {
        writeln!(
            out,
            r#"{INDENT}<Dimension name="{}" size="{}"/>"#,
            escape_xml(&dim.name),
            dim.size
        )?;
    }
    for var in &dataset.variables {
        print_xml_variable(out, var, chunks)?;
    }
    for attr in &dataset.attributes {
        print_xml_attribute(out, attr, 1)?;
    }

    writeln!(out, "</Dataset>")
}

fn print_xml_variable<W: Write + ?Sized>(
    out: &mut W,
    var: &Variable,
    chunks: bool,
) -> io::Result<()> {
    let layout = var.chunks.as_ref().filter(|_| chunks);
    let ty = var.data_type.as_str();
    let name = escape_xml(&var.name);

    if var.dims.is_empty() && var.attributes.is_empty() && layout.is_none() {
        return writeln!(out, r#"{INDENT}<{ty} name="{name}"/>"#);
    }

    writeln!(out, r#"{INDENT}<{ty} name="{name}">"#)?;
    for dim in &var.dims {
        writeln!(out, r#"{INDENT}{INDENT}<Dim name="/{}"/>"#, escape_xml(dim))?;
    }
    for attr in &var.attributes {
        print_xml_attribute(out, attr, 2)?;
    }
    if let Some(layout) = layout {
        print_chunk_layout(out, layout)?;
    }
    writeln!(out, "{INDENT}</{ty}>")
}

fn print_xml_attribute<W: Write + ?Sized>(
    out: &mut W,
    attr: &Attribute,
    depth: usize,
) -> io::Result<()> {
    let indent = INDENT.repeat(depth);
    let head = format!(
        r#"{indent}<Attribute name="{}" type="{}""#,
        escape_xml(&attr.name),
        attr.data_type
    );
    if attr.values.is_empty() {
        return writeln!(out, "{head}/>");
    }

    writeln!(out, "{head}>")?;
    for value in &attr.values {
        writeln!(out, "{indent}{INDENT}<Value>{}</Value>", escape_xml(value))?;
    }
    writeln!(out, "{indent}</Attribute>")
}

fn print_chunk_layout<W: Write + ?Sized>(out: &mut W, layout: &ChunkLayout) -> io::Result<()> {
    let indent = INDENT.repeat(2);
    writeln!(out, "{indent}<dmrpp:chunks>")?;
    if !layout.chunk_shape.is_empty() {
        writeln!(
            out,
            "{indent}{INDENT}<dmrpp:chunkDimensionSizes>{}</dmrpp:chunkDimensionSizes>",
            join(&layout.chunk_shape, " ")
        )?;
    }
    for chunk in &layout.chunks {
        writeln!(
            out,
            r#"{indent}{INDENT}<dmrpp:chunk offset="{}" nBytes="{}" chunkPositionInArray="[{}]"/>"#,
            chunk.offset,
            chunk.size,
            join(&chunk.position, ",")
        )?;
    }
    writeln!(out, "{indent}</dmrpp:chunks>")
}

fn invalid(err: DapError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err)
}

fn join(values: &[u64], sep: &str) -> String {
    values
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

/// Escape text for use in XML content and double-quoted attribute values.
///
/// Whitespace control characters are written as character references so that
/// attribute-value normalisation cannot alter them on the way back in.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
