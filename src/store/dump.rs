use std::collections::HashSet;
use std::io::Write;

use itertools::Itertools;

use super::bss::BssStore;
use crate::block::Block;
use crate::error::Result;
use crate::{corruption, Error};

impl BssStore {
    /// One line per physical block slot, in RBN order, preceded by the two
    /// list heads.
    pub fn dump_physical(&mut self, out: &mut dyn Write) -> Result<()> {
        emit(out, &format!("List Head: {}", self.header.active_list_head))?;
        emit(out, &format!("Avail Head: {}", self.header.avail_list_head))?;
        for rbn in 0..self.header.block_count {
            let block = self.read_block(rbn)?;
            emit(out, &block_line(rbn, &block))?;
        }
        Ok(())
    }

    /// Walks the active chain in key order, then the availability chain.
    /// A revisited block means a cycle in the links.
    pub fn dump_logical(&mut self, out: &mut dyn Write) -> Result<()> {
        emit(out, &format!("List Head: {}", self.header.active_list_head))?;
        emit(out, &format!("Avail Head: {}", self.header.avail_list_head))?;

        let mut visited = HashSet::new();
        let mut rbn = self.header.active_list_head;
        while rbn >= 0 {
            if !visited.insert(rbn) {
                return corruption!("cycle in active list at block {}", rbn);
            }
            let block = self.read_block(rbn)?;
            emit(out, &block_line(rbn, &block))?;
            rbn = block.next_rbn();
        }

        rbn = self.header.avail_list_head;
        while rbn >= 0 {
            if !visited.insert(rbn) {
                return corruption!("cycle in availability list at block {}", rbn);
            }
            let block = self.read_block(rbn)?;
            emit(out, &block_line(rbn, &block))?;
            rbn = block.next_rbn();
        }
        Ok(())
    }

    /// One `key -> rbn` line per sparse index entry, ascending by key.
    pub fn dump_index(&self, out: &mut dyn Write) -> Result<()> {
        emit(out, "Index:")?;
        for (key, rbn) in self.index.iter() {
            emit(out, &format!("{key} -> {rbn}"))?;
        }
        Ok(())
    }
}

fn emit(out: &mut dyn Write, line: &str) -> Result<()> {
    writeln!(out, "{line}").map_err(|e| Error::Io("write dump", e))
}

fn block_line(rbn: i32, block: &Block) -> String {
    if block.is_avail() {
        format!("RBN {rbn:>3}  *available*     -> {}", block.next_rbn())
    } else {
        format!(
            "RBN {rbn:>3}  {} -> {}",
            block.records().iter().map(|r| r.zip.as_str()).join(" "),
            block.next_rbn()
        )
    }
}
