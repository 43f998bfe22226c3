use std::fmt::Write;

use cffsat_formula::Encoding;

use crate::cache::OutcomeCache;

/// The largest known family for each ground-set size, one line per `t`.
pub fn render(cache: &OutcomeCache, d: u32, encoding: Encoding) -> String {
    let best = cache.best_per_t(d, encoding);
    let mut out = String::new();
    let _ = writeln!(out, "d={d} ({encoding})");
    let _ = writeln!(out, "{:>4} {:>5} {:>10} {:>9}", "t", "n", "clauses", "secs");
    for (t, record) in &best {
        let _ = writeln!(
            out,
            "{:>4} {:>5} {:>10} {:>9.2}",
            t, record.n, record.clauses, record.time
        );
    }
    if best.is_empty() {
        out.push_str("(no satisfiable records)\n");
    }
    out
}
