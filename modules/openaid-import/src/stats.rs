/// Stats from an import run.
#[derive(Debug, Clone, Default)]
pub struct ImportStats {
    pub total_records: u32,
    pub processed: u32,
    pub successful: u32,
    pub failed: u32,
    pub flagged: u32,
    pub rejected: u32,
    pub skipped: u32,
    pub batches: u32,
    pub geocode_failures: u32,
    pub llm_cost_usd: f64,
}

impl std::fmt::Display for ImportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Import Run Complete ===")?;
        writeln!(f, "Total records:   {}", self.total_records)?;
        writeln!(f, "Processed:       {}", self.processed)?;
        writeln!(f, "Batches:         {}", self.batches)?;
        writeln!(f, "\nOutcomes:")?;
        writeln!(f, "  Approved:      {}", self.successful)?;
        writeln!(f, "  Flagged:       {}", self.flagged)?;
        writeln!(f, "  Rejected:      {}", self.rejected)?;
        writeln!(f, "  Skipped:       {}", self.skipped)?;
        writeln!(f, "  Errored:       {}", self.failed)?;
        if self.geocode_failures > 0 {
            writeln!(f, "\nGeocode failures: {}", self.geocode_failures)?;
        }
        writeln!(f, "\nLLM spend: ${:.4}", self.llm_cost_usd)?;
        Ok(())
    }
}
