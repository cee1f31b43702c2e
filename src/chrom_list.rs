//! Chromosome names and lengths, indexed in the same order as the alignment file header
//!

use std::collections::HashMap;

use rust_htslib::bam;

#[derive(Clone, Debug)]
pub struct ChromInfo {
    pub label: String,
    pub length: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ChromList {
    pub data: Vec<ChromInfo>,
    pub label_to_index: HashMap<String, usize>,
}

impl ChromList {
    pub fn add_chrom(&mut self, label: &str, length: u64) {
        self.label_to_index
            .insert(label.to_string(), self.data.len());
        self.data.push(ChromInfo {
            label: label.to_string(),
            length,
        });
    }

    /// Build the chromosome list from the sequence dictionary of an alignment file header
    ///
    pub fn from_bam_header(header: &bam::HeaderView) -> Self {
        let mut chrom_list = Self::default();
        for tid in 0..header.target_count() {
            let label = String::from_utf8_lossy(header.tid2name(tid)).to_string();
            let length = header.target_len(tid).unwrap_or(0);
            chrom_list.add_chrom(&label, length);
        }
        chrom_list
    }

    pub fn label(&self, chrom_index: usize) -> &str {
        self.data[chrom_index].label.as_str()
    }
}
