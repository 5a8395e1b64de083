use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Days;
use ulid::Ulid;

use staydesk::client::{Backend, HttpBackend};
use staydesk::engine::EngineError;
use staydesk::model::*;

fn base_day() -> Day {
    "2025-01-01".parse().expect("valid date")
}

/// The `i`-th one-night stay after the base day.
fn night(i: u64) -> (Day, Day) {
    let start = base_day() + Days::new(i);
    (start, start + Days::new(1))
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn new_room(backend: &HttpBackend, partner_id: Ulid) -> Room {
    backend
        .create_room(NewRoom {
            partner_id,
            details: RoomDetails {
                title: "Bench room".into(),
                price_per_month: 4000.0,
                location_name: "Bench".into(),
                property_type: PropertyType::Boarding,
                room_type: RoomType::Shared,
                gender_restriction: GenderRestriction::Any,
                amenities: BTreeSet::new(),
            },
            status: RoomStatus::Available,
        })
        .await
        .expect("create room failed")
}

async fn book_night(backend: &HttpBackend, room_id: Ulid, i: u64) -> Result<Booking, EngineError> {
    let (check_in, check_out) = night(i);
    backend
        .create_booking(NewBooking {
            room_id,
            guest_name: format!("Guest {i}"),
            guest_phone: "+15550100".into(),
            check_in,
            check_out: Some(check_out),
            total_price: 130.0,
            status: BookingStatus::Confirmed,
        })
        .await
}

async fn phase1_sequential(backend: &HttpBackend) {
    let room = new_room(backend, Ulid::new()).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        book_night(backend, room.id, i).await.expect("booking failed");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(backend: &HttpBackend) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let backend = backend.clone();
        handles.push(tokio::spawn(async move {
            let room = new_room(&backend, Ulid::new()).await;
            for j in 0..n_per_task {
                book_night(&backend, room.id, j).await.expect("booking failed");
            }
        }));
    }

    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Every task fights for the same nights; exactly one booking per night wins.
async fn phase3_contention(backend: &HttpBackend) {
    let room = new_room(backend, Ulid::new()).await;
    let n_tasks = 20;
    let nights = 50;

    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let attempts = (0..n_tasks).map(|_| {
        let backend = backend.clone();
        let conflicts = conflicts.clone();
        async move {
            let mut won = 0usize;
            for i in 0..nights {
                match book_night(&backend, room.id, i).await {
                    Ok(_) => won += 1,
                    Err(EngineError::Conflict { .. }) => {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            won
        }
    });
    let won: usize = futures::future::join_all(attempts).await.into_iter().sum();

    println!(
        "  {n_tasks} tasks x {nights} nights: {won} admitted, {} conflicts in {:.2}s",
        conflicts.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, nights as usize, "double booking detected");
}

async fn phase4_read_under_load(backend: &HttpBackend) {
    let partner = Ulid::new();
    let read_room = new_room(backend, partner).await;
    for i in 0..200 {
        book_night(backend, read_room.id, i * 2).await.expect("booking failed");
    }

    // Writer tasks: continuously add bookings in the background
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let backend = backend.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let room = new_room(&backend, Ulid::new()).await;
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = book_night(&backend, room.id, i).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let backend = backend.clone();
        let room_id = read_room.id;
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                if (r + i) % 2 == 0 {
                    backend
                        .free_windows(room_id, base_day(), base_day() + Days::new(365))
                        .await
                        .expect("free windows failed");
                } else {
                    backend.list_bookings(partner).await.expect("list failed");
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.expect("reader panicked"));
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("read latency", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("STAYDESK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("STAYDESK_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .expect("invalid STAYDESK_PORT");

    println!("=== staydesk stress benchmark ===");
    println!("target: {host}:{port}\n");

    let backend = HttpBackend::new(&format!("http://{host}:{port}")).expect("invalid target");
    backend.health().await.expect("server not reachable");

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&backend).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&backend).await;

    println!("\n[phase 3] contention on a single room");
    phase3_contention(&backend).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&backend).await;

    println!("\n=== benchmark complete ===");
}
