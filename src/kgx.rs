//! Streaming writer for the `{"nodes":[...],"edges":[...]}` document.

use std::io::Write;

use serde::Serialize;

use crate::error::KiraError;
use crate::model::{EdgeRecord, KgxNode, VariantNode, VariantNodeOut};

pub const VARIANT_CHECKPOINT: usize = 100_000;
pub const EDGE_CHECKPOINT: usize = 250_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Start,
    Nodes,
    Edges,
    Done,
}

/// Writes one element at a time; the separator goes before every element but
/// the first of its array, so no trailing comma can be produced.
pub struct KgxWriter<W: Write> {
    out: W,
    section: Section,
    in_section: usize,
    nodes: usize,
    variants: usize,
    edges: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteCounts {
    pub nodes: usize,
    pub variant_nodes: usize,
    pub edges: usize,
}

impl<W: Write> KgxWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            section: Section::Start,
            in_section: 0,
            nodes: 0,
            variants: 0,
            edges: 0,
        }
    }

    pub fn begin(&mut self) -> Result<(), KiraError> {
        self.expect(Section::Start)?;
        self.raw(b"{\"nodes\":[")?;
        self.section = Section::Nodes;
        self.in_section = 0;
        Ok(())
    }

    pub fn write_node(&mut self, node: &KgxNode) -> Result<(), KiraError> {
        self.expect(Section::Nodes)?;
        self.element(node)?;
        self.nodes += 1;
        Ok(())
    }

    pub fn write_nodes<'n>(
        &mut self,
        nodes: impl IntoIterator<Item = &'n KgxNode>,
    ) -> Result<(), KiraError> {
        for node in nodes {
            self.write_node(node)?;
        }
        Ok(())
    }

    pub fn write_variant(&mut self, variant: &VariantNode) -> Result<(), KiraError> {
        self.expect(Section::Nodes)?;
        self.element(&VariantNodeOut::from(variant))?;
        self.nodes += 1;
        self.variants += 1;
        if self.variants % VARIANT_CHECKPOINT == 0 {
            self.out
                .flush()
                .map_err(|err| KiraError::Serialization(err.to_string()))?;
            tracing::info!(progress = self.variants, "writing sequence variant nodes");
        }
        Ok(())
    }

    pub fn begin_edges(&mut self) -> Result<(), KiraError> {
        self.expect(Section::Nodes)?;
        self.raw(b"],\"edges\":[")?;
        self.section = Section::Edges;
        self.in_section = 0;
        Ok(())
    }

    pub fn write_edge(&mut self, edge: &EdgeRecord) -> Result<(), KiraError> {
        self.expect(Section::Edges)?;
        self.element(edge)?;
        self.edges += 1;
        if self.edges % EDGE_CHECKPOINT == 0 {
            self.out
                .flush()
                .map_err(|err| KiraError::Serialization(err.to_string()))?;
            tracing::info!(progress = self.edges, "writing edges");
        }
        Ok(())
    }

    /// Closes the document. A writer still in the node section gets an empty
    /// edge array first.
    pub fn finish(mut self) -> Result<(W, WriteCounts), KiraError> {
        if self.section == Section::Nodes {
            self.begin_edges()?;
        }
        self.expect(Section::Edges)?;
        self.raw(b"]}")?;
        self.out
            .flush()
            .map_err(|err| KiraError::Serialization(err.to_string()))?;
        self.section = Section::Done;
        let counts = WriteCounts {
            nodes: self.nodes,
            variant_nodes: self.variants,
            edges: self.edges,
        };
        Ok((self.out, counts))
    }

    fn element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KiraError> {
        if self.in_section > 0 {
            self.raw(b",")?;
        }
        serde_json::to_writer(&mut self.out, value)
            .map_err(|err| KiraError::Serialization(err.to_string()))?;
        self.in_section += 1;
        Ok(())
    }

    fn raw(&mut self, bytes: &[u8]) -> Result<(), KiraError> {
        self.out
            .write_all(bytes)
            .map_err(|err| KiraError::Serialization(err.to_string()))
    }

    fn expect(&self, section: Section) -> Result<(), KiraError> {
        if self.section != section {
            return Err(KiraError::Serialization(format!(
                "writer in {:?} section, expected {:?}",
                self.section, section
            )));
        }
        Ok(())
    }
}
