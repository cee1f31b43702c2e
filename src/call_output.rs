//! Tabular output of site calls
//!

use std::fs::File;
use std::io::{BufWriter, Write};

use camino::Utf8Path;
use itertools::Itertools;
use log::info;
use unwrap::unwrap;

use crate::chrom_list::ChromList;
use crate::site_caller::SiteCall;

pub const CALLS_FILENAME: &str = "calls.tsv";

const CALLS_HEADER: &str = "#CHROM\tPOS\tREF\tALT\tQUAL\tALT_PROB\tLN_NORM\tNORM\tSAMPLES";

/// Format the sample columns of a call, as `name=GT:GQ:DP`
fn get_sample_fields(call: &SiteCall, sample_names: &[String], ploidy: usize) -> Vec<String> {
    sample_names
        .iter()
        .enumerate()
        .map(|(sample_index, name)| match call.samples.get(sample_index) {
            Some(Some(x)) => format!("{name}={}:{}:{}", x.genotype, x.gq, x.depth),
            _ => format!("{name}={}:.:0", vec!["."; ploidy].join("/")),
        })
        .collect()
}

/// Format one site call as a tab-delimited line, without the line ending
///
/// Positions are reported 1-indexed.
///
pub fn format_call_record(
    call: &SiteCall,
    chrom_list: &ChromList,
    sample_names: &[String],
    ploidy: usize,
) -> String {
    let alts = call
        .candidates
        .iter()
        .filter(|x| !x.is_reference())
        .join(",");
    let alts = if alts.is_empty() { ".".to_string() } else { alts };
    let norm_label = if call.exact_normalization {
        "exact"
    } else {
        "approx"
    };
    let mut fields = vec![
        chrom_list.label(call.chrom_index).to_string(),
        (call.pos + 1).to_string(),
        (call.ref_base as char).to_string(),
        alts,
        format!("{:.2}", call.qual),
        format!("{:.6}", call.alt_prob),
        format!("{:.4}", call.ln_normalization),
        norm_label.to_string(),
    ];
    fields.extend(get_sample_fields(call, sample_names, ploidy));
    fields.join("\t")
}

/// Writes site calls to any output stream
pub struct CallWriter<W: Write> {
    writer: W,
    ploidy: usize,
    pub record_count: usize,
}

impl<W: Write> CallWriter<W> {
    pub fn new(mut writer: W, ploidy: usize) -> Self {
        writeln!(writer, "{CALLS_HEADER}").unwrap();
        Self {
            writer,
            ploidy,
            record_count: 0,
        }
    }

    pub fn write_call(&mut self, call: &SiteCall, chrom_list: &ChromList, sample_names: &[String]) {
        let record = format_call_record(call, chrom_list, sample_names, self.ploidy);
        writeln!(self.writer, "{record}").unwrap();
        self.record_count += 1;
    }

    pub fn into_inner(mut self) -> W {
        self.writer.flush().unwrap();
        self.writer
    }
}

/// Create the calls file in the output directory
pub fn get_call_file_writer(output_dir: &Utf8Path, ploidy: usize) -> CallWriter<BufWriter<File>> {
    let filename = output_dir.join(CALLS_FILENAME);

    info!("Writing site calls to file: '{filename}'");

    let f = unwrap!(
        File::create(&filename),
        "Unable to create site calls file: '{filename}'"
    );
    CallWriter::new(BufWriter::new(f), ploidy)
}
