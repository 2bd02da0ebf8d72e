use super::OutputSink;
use crate::descriptor::{BenchmarkDescriptor, Mode};
use crate::options::{BenchmarkParams, IterationParams};
use crate::results::{IterationKind, IterationSample, RunResult};
use crate::utils::{format_duration, format_table_row, format_table_separator};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Human-readable progress and results
pub struct PrettyPrintSink {
    out: Box<dyn Write + Send>,
    verbose: bool,
}

impl PrettyPrintSink {
    pub fn new(out: Box<dyn Write + Send>, verbose: bool) -> Self {
        Self { out, verbose }
    }

    pub fn stdout(verbose: bool) -> Self {
        Self::new(Box::new(io::stdout()), verbose)
    }

    /// Write to a file, truncating it
    pub fn to_file(path: &Path, verbose: bool) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Self::new(Box::new(BufWriter::new(file)), verbose))
    }

    fn iteration_header(mode: Mode, iteration: IterationParams) -> String {
        if iteration.count == 0 {
            return "<none>".to_string();
        }
        let plural = if iteration.count == 1 { "" } else { "s" };
        match mode {
            Mode::SingleShot => format!("{} iteration{}, single-shot each", iteration.count, plural),
            _ => format!(
                "{} iteration{}, {} each",
                iteration.count,
                plural,
                format_duration(iteration.time)
            ),
        }
    }

    fn write_summary(&mut self, results: &BTreeMap<BenchmarkDescriptor, RunResult>) -> Result<()> {
        let header = ["Benchmark", "Mode", "Threads", "Cnt", "Score", "Units"];
        let rows: Vec<[String; 6]> = results
            .iter()
            .map(|(descriptor, result)| {
                let score = result
                    .primary()
                    .score()
                    .map_or_else(|| "undefined".to_string(), |s| format!("{:.3}", s));
                [
                    descriptor.name().to_string(),
                    descriptor.mode().label().to_string(),
                    descriptor.threads().to_string(),
                    result.iteration_scores().len().to_string(),
                    score,
                    result.primary().score_unit(),
                ]
            })
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        writeln!(self.out)?;
        writeln!(self.out, "{}", format_table_separator(&widths))?;
        writeln!(self.out, "{}", format_table_row(&header, &widths))?;
        writeln!(self.out, "{}", format_table_separator(&widths))?;
        for row in &rows {
            let cells: Vec<&str> = row.iter().map(String::as_str).collect();
            writeln!(self.out, "{}", format_table_row(&cells, &widths))?;
        }
        writeln!(self.out, "{}", format_table_separator(&widths))?;
        Ok(())
    }
}

impl OutputSink for PrettyPrintSink {
    fn iteration_start(
        &mut self,
        _descriptor: &BenchmarkDescriptor,
        _params: &BenchmarkParams,
        index: u32,
        kind: IterationKind,
    ) -> Result<()> {
        match kind {
            IterationKind::Warmup => write!(self.out, "# Warmup Iteration {:>3}: ", index)?,
            IterationKind::Measurement => write!(self.out, "Iteration {:>3}: ", index)?,
        }
        self.out.flush()?;
        Ok(())
    }

    fn iteration_end(
        &mut self,
        _descriptor: &BenchmarkDescriptor,
        _params: &BenchmarkParams,
        _index: u32,
        _kind: IterationKind,
        sample: &IterationSample,
    ) -> Result<()> {
        let mut line = sample.primary.to_string();
        for (name, value) in &sample.secondary {
            line.push_str(&format!("\n                  {}: {}", name, value));
        }
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        Ok(())
    }

    fn benchmark_start(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
    ) -> Result<()> {
        let mode = descriptor.mode();
        let threads = descriptor.threads();
        writeln!(
            self.out,
            "# Warmup: {}",
            Self::iteration_header(mode, params.warmup)
        )?;
        writeln!(
            self.out,
            "# Measurement: {}",
            Self::iteration_header(mode, params.measurement)
        )?;
        writeln!(
            self.out,
            "# Threads: {} thread{}, {}",
            threads,
            if threads == 1 { "" } else { "s" },
            if params.sync_iterations {
                "will synchronize iterations"
            } else {
                "no synchronization"
            }
        )?;
        writeln!(self.out, "# Benchmark mode: {}", mode.long_label())?;
        writeln!(self.out, "# Running: {}", descriptor.name())?;
        self.out.flush()?;
        Ok(())
    }

    fn benchmark_end(
        &mut self,
        _descriptor: &BenchmarkDescriptor,
        result: Option<&RunResult>,
    ) -> Result<()> {
        writeln!(self.out)?;
        if let Some(result) = result {
            writeln!(self.out, "{}", result.extended_info())?;
            writeln!(self.out)?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn run_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_end(&mut self, results: &BTreeMap<BenchmarkDescriptor, RunResult>) -> Result<()> {
        for (descriptor, result) in results.iter().filter(|(_, r)| r.contributions() > 1) {
            writeln!(
                self.out,
                "\n\"{}\", aggregate over {} forked runs:",
                descriptor,
                result.contributions()
            )?;
            writeln!(self.out, "{}", result.extended_info())?;
        }

        writeln!(self.out, "\n\n# Run complete.")?;
        if !results.is_empty() {
            self.write_summary(results)?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn detailed_results(
        &mut self,
        _descriptor: &BenchmarkDescriptor,
        _index: u32,
        sample: &IterationSample,
    ) -> Result<()> {
        let per_thread: Vec<String> = sample
            .raw_primary
            .iter()
            .map(|v| {
                v.score()
                    .map_or_else(|| "undefined".to_string(), |s| format!("{:.3}", s))
            })
            .collect();
        writeln!(self.out, "          Results per thread: [{}]", per_thread.join(", "))?;
        Ok(())
    }

    fn exception(&mut self, message: &str) -> Result<()> {
        writeln!(self.out, "<failure>\n\n{}\n", message)?;
        self.out.flush()?;
        Ok(())
    }

    fn println(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    fn verbose_println(&mut self, line: &str) -> Result<()> {
        if self.verbose {
            writeln!(self.out, "{}", line)?;
        }
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.out.write_all(&[byte])?;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{ResultValue, ThreadResult, TimeUnit};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Writer that appends into a shared buffer
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn params() -> BenchmarkParams {
        BenchmarkParams {
            warmup: IterationParams {
                count: 2,
                time: Duration::from_millis(500),
            },
            measurement: IterationParams {
                count: 1,
                time: Duration::from_secs(1),
            },
            threads: 2,
            sync_iterations: true,
            time_unit: TimeUnit::Seconds,
            forks: 0,
            warmup_forks: 0,
        }
    }

    fn sample(kind: IterationKind) -> IterationSample {
        let threads = vec![
            ThreadResult::new(ResultValue::throughput("b", 1000, 1_000_000_000, TimeUnit::Seconds)),
            ThreadResult::new(ResultValue::throughput("b", 3000, 1_000_000_000, TimeUnit::Seconds)),
        ];
        IterationSample::from_threads(1, kind, 1_000_000_000, threads).unwrap()
    }

    #[test]
    fn test_benchmark_headers() {
        let buffer = SharedBuffer::default();
        let mut sink = PrettyPrintSink::new(Box::new(buffer.clone()), false);
        let d = BenchmarkDescriptor::new("bench", Mode::Throughput, 2);
        sink.benchmark_start(&d, &params()).unwrap();

        let text = buffer.text();
        assert!(text.contains("# Warmup: 2 iterations, 500.00ms each"));
        assert!(text.contains("# Measurement: 1 iteration, 1.00s each"));
        assert!(text.contains("# Threads: 2 threads, will synchronize iterations"));
        assert!(text.contains("# Benchmark mode: Throughput, ops/time"));
        assert!(text.contains("# Running: bench"));
    }

    #[test]
    fn test_iteration_lines() {
        let buffer = SharedBuffer::default();
        let mut sink = PrettyPrintSink::new(Box::new(buffer.clone()), false);
        let d = BenchmarkDescriptor::new("bench", Mode::Throughput, 2);
        let p = params();

        sink.iteration_start(&d, &p, 1, IterationKind::Warmup).unwrap();
        sink.iteration_end(&d, &p, 1, IterationKind::Warmup, &sample(IterationKind::Warmup))
            .unwrap();
        sink.iteration_start(&d, &p, 1, IterationKind::Measurement).unwrap();
        let measured = sample(IterationKind::Measurement);
        sink.iteration_end(&d, &p, 1, IterationKind::Measurement, &measured)
            .unwrap();
        sink.detailed_results(&d, 1, &measured).unwrap();

        let text = buffer.text();
        assert!(text.contains("# Warmup Iteration   1: 4000.000 ops/s"));
        assert!(text.contains("Iteration   1: 4000.000 ops/s"));
        assert!(text.contains("Results per thread: [1000.000, 3000.000]"));
    }

    #[test]
    fn test_run_end_aggregates_forks_and_prints_table() {
        let buffer = SharedBuffer::default();
        let mut sink = PrettyPrintSink::new(Box::new(buffer.clone()), false);
        let d = BenchmarkDescriptor::new("bench", Mode::Throughput, 2);
        let run = RunResult::from_iterations(&[sample(IterationKind::Measurement)]).unwrap();
        let mut results = BTreeMap::new();
        results.insert(d, run.merge(&run));

        sink.run_end(&results).unwrap();

        let text = buffer.text();
        assert!(text.contains("\"bench (thrpt)\", aggregate over 2 forked runs:"));
        assert!(text.contains("# Run complete."));
        assert!(text.contains("| Benchmark | Mode  | Threads | Cnt | Score    | Units |"));
        assert!(text.contains("| bench     | thrpt | 2       | 2   | 4000.000 | ops/s |"));
    }

    #[test]
    fn test_verbose_lines_respect_flag() {
        let buffer = SharedBuffer::default();
        let mut quiet = PrettyPrintSink::new(Box::new(buffer.clone()), false);
        quiet.verbose_println("hidden").unwrap();
        let mut loud = PrettyPrintSink::new(Box::new(buffer.clone()), true);
        loud.verbose_println("shown").unwrap();

        let text = buffer.text();
        assert!(!text.contains("hidden"));
        assert!(text.contains("shown"));
    }
}
