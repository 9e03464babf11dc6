use std::io::Write;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use libframecache::testlib::SyntheticDecoder;
use libframecache::FrameCache;
use tracing_subscriber::EnvFilter;

const FRAME_WIDTH: u32 = 512;
const FRAME_HEIGHT: u32 = 512;
// How far ahead of the playhead to prefetch.
const LOOKAHEAD: u32 = 4;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    // Use std::env for argument parsing
    let mut args = std::env::args().skip(1);
    let frame_count = match args.next().map(|val| val.parse::<u32>()) {
        Some(Ok(num)) => num,
        Some(Err(_)) => {
            eprintln!("frame_count must be a valid u32");
            process::exit(1);
        }
        None => {
            eprintln!("Missing required argument: frame_count");
            print_usage_and_exit();
        }
    };
    let cache_size = match args.next().map(|val| val.parse::<usize>()) {
        Some(Ok(num)) => num,
        Some(Err(_)) => {
            eprintln!("cache_size must be a valid number");
            process::exit(1);
        }
        None => {
            eprintln!("Missing required argument: cache_size");
            print_usage_and_exit();
        }
    };

    let mut prefetch = false;
    let mut delay_ms = 0u64;
    while let Some(arg) = args.next() {
        if arg == "--prefetch" {
            prefetch = true;
        } else if arg == "--delay-ms" {
            match args.next().map(|val| val.parse::<u64>()) {
                Some(Ok(ms)) => delay_ms = ms,
                _ => {
                    eprintln!("Expected a number of milliseconds after --delay-ms");
                    print_usage_and_exit();
                }
            }
        } else {
            eprintln!("Unknown argument: {}", arg);
            print_usage_and_exit();
        }
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        eprintln!("Could not install Ctrl-C handler: {}", e);
    }

    let decoder = Arc::new(
        SyntheticDecoder::new(frame_count, FRAME_WIDTH, FRAME_HEIGHT).with_delay(Duration::from_millis(delay_ms)),
    );
    let cache = match FrameCache::builder()
        .cache_size(cache_size)
        .prefetch(prefetch)
        .build(decoder.clone())
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Could not create frame cache: {}", e);
            process::exit(1);
        }
    };

    println!("Frame count: {}", cache.frame_count());
    println!("Cache size: {} frames", cache.cache_size());
    println!("Frame size: {} bytes", cache.geometry().bytes_per_frame());
    match (cache.first_timestamp(), cache.last_timestamp()) {
        (Ok(first), Ok(last)) => println!("Time range: {} .. {}", first, last),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("No timestamps available: {}", e);
            process::exit(1);
        }
    }

    println!("Walking all frames...");
    let total = cache.frame_count();
    let mut last_percent = 0;
    let mut walked = 0;
    let start = Instant::now();
    for frame_idx in 0..total {
        if interrupted.load(Ordering::SeqCst) {
            println!("\nInterrupted.");
            break;
        }
        if prefetch {
            cache.prefetch_range(frame_idx + 1, LOOKAHEAD);
        }
        match cache.get_frame(frame_idx) {
            Ok(frame) => {
                let _checksum: u64 = frame.pixels().iter().map(|&b| b as u64).sum();
            }
            Err(e) => {
                eprintln!("\nError: frame {}: {}", frame_idx, e);
                process::exit(1);
            }
        }
        walked += 1;
        let percent = progress_percent(frame_idx + 1, total);
        if percent != last_percent && (percent % 5 == 0 || percent == 100) {
            print!("\rProgress: {:3}% ({}/{} frames)", percent, frame_idx + 1, total);
            let _ = std::io::stdout().flush();
            last_percent = percent;
        }
    }
    let elapsed = start.elapsed();
    let stats = cache.stats();
    println!("\nDone.");
    println!("Walked {} frames in {:.3} seconds ({:.2} ms/frame)",
        walked,
        elapsed.as_secs_f64(),
        if walked > 0 { elapsed.as_secs_f64() * 1000.0 / walked as f64 } else { 0.0 }
    );
    println!("Hits: {}  Misses: {}  Decodes: {}", stats.hits, stats.misses, decoder.total_decodes());
    println!("Resident: {}  Materialized slots: {}", stats.resident, stats.materialized);
}

// Widened so large frame counts cannot overflow.
fn progress_percent(done: u32, total: u32) -> u64 {
    if total == 0 {
        return 100;
    }
    (done as u64 * 100 / total as u64).min(100)
}

fn print_usage_and_exit() -> ! {
    eprintln!("Usage: demo <frame_count> <cache_size> [--prefetch] [--delay-ms <ms>]");
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent_large_counts() {
        assert_eq!(progress_percent(1, 4), 25);
        assert_eq!(progress_percent(u32::MAX, u32::MAX), 100);
        assert_eq!(progress_percent(50_000_000, 100_000_000), 50);
        assert_eq!(progress_percent(0, 0), 100);
    }
}
