use crate::error::{Result, StoreError};
use crate::key::DocumentKind;
use granule_core::Container;
use granule_dap::Dataset;
use std::io::Write;

/// Serialises one document into the sink the store hands it.
///
/// Writing nothing is allowed; the store treats an empty document as "nothing
/// to cache" rather than as a valid entry.
pub trait ResponseWriter {
    fn write_to(&self, out: &mut dyn Write) -> Result<()>;
}

impl<F> ResponseWriter for F
where
    F: Fn(&mut dyn Write) -> Result<()>,
{
    fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        self(out)
    }
}

/// Renders `dataset` as the document of the given kind.
#[derive(Clone, Copy, Debug)]
pub struct DatasetResponse<'a> {
    pub dataset: &'a Dataset,
    pub kind: DocumentKind,
}

impl<'a> DatasetResponse<'a> {
    pub fn new(dataset: &'a Dataset, kind: DocumentKind) -> Self {
        Self { dataset, kind }
    }
}

impl ResponseWriter for DatasetResponse<'_> {
    fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        // Refuse up front: a document the store cannot read back must not be cached.
        self.dataset.check_dimensions()?;
        match self.kind {
            DocumentKind::Schema => granule_dap::print_schema(self.dataset, out)?,
            DocumentKind::Attributes => granule_dap::print_attributes(self.dataset, out)?,
            DocumentKind::Metadata => granule_dap::print_metadata(self.dataset, out)?,
            DocumentKind::ChunkIndex => granule_dap::print_chunk_index(self.dataset, out)?,
        }
        Ok(())
    }
}

/// Builds the structured description of a dataset on a cache miss.
///
/// This is the expensive step the store exists to avoid: format handlers
/// implement it by walking the data file.
pub trait DatasetBuilder {
    fn build_dataset(&self, container: &dyn Container) -> Result<Dataset>;
}

impl<F> DatasetBuilder for F
where
    F: Fn(&dyn Container) -> Result<Dataset>,
{
    fn build_dataset(&self, container: &dyn Container) -> Result<Dataset> {
        self(container)
    }
}

/// Per-request values some documents need when they are served.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseContext {
    /// URL of the data the chunk index points into.
    pub base_uri: Option<String>,
}

impl ResponseContext {
    pub fn with_base_uri(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: Some(base_uri.into()),
        }
    }

    /// The base URI, or `MissingContext` when `kind` needs one and none is set.
    pub(crate) fn base_uri_for(&self, kind: DocumentKind) -> Result<Option<&str>> {
        if !kind.requires_base_uri() {
            return Ok(None);
        }
        match self.base_uri.as_deref() {
            Some(uri) if !uri.is_empty() => Ok(Some(uri)),
            _ => Err(StoreError::MissingContext { key: "base_uri" }),
        }
    }
}

/// A dataset description together with the protocol it was built for. This
/// decides which documents [`add_responses`](crate::MetadataStore::add_responses)
/// stores.
#[derive(Clone, Copy, Debug)]
pub enum DatasetForm<'a> {
    /// Built for DAP2: schema, attributes and metadata documents.
    Classic(&'a Dataset),
    /// Built for DAP4: the metadata document.
    Dap4(&'a Dataset),
    /// Annotated with chunk locations: metadata and chunk-index documents.
    Chunked(&'a Dataset),
}

impl<'a> DatasetForm<'a> {
    pub fn dataset(&self) -> &'a Dataset {
        match *self {
            DatasetForm::Classic(d) | DatasetForm::Dap4(d) | DatasetForm::Chunked(d) => d,
        }
    }

    pub fn kinds(&self) -> &'static [DocumentKind] {
        match self {
            DatasetForm::Classic(_) => &[
                DocumentKind::Schema,
                DocumentKind::Attributes,
                DocumentKind::Metadata,
            ],
            DatasetForm::Dap4(_) => &[DocumentKind::Metadata],
            DatasetForm::Chunked(_) => &[DocumentKind::Metadata, DocumentKind::ChunkIndex],
        }
    }
}
