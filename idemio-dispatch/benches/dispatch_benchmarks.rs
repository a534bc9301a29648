use criterion::{Criterion, criterion_group, criterion_main};
use idemio_dispatch::DispatchTemplate;
use idemio_dispatch::config::WorkerPoolConfig;
use idemio_dispatch::error::ProcessingError;
use idemio_dispatch::exchange::Exchange;
use idemio_dispatch::pool::WorkerPool;
use idemio_dispatch::processor::processor_fn;
use idemio_dispatch::processor::registry::DestinationRegistry;
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

// Measures dispatch overhead against a trivial destination.

fn echo(exchange: &mut Exchange) -> Result<(), ProcessingError> {
    let body = exchange
        .message()
        .body_as::<String>()
        .map_err(ProcessingError::from_error)?
        .unwrap_or_default();
    exchange.message_mut().set_body(format!("{}{}", body, body));
    Ok(())
}

fn create_template(rt: &Runtime) -> DispatchTemplate {
    let registry = DestinationRegistry::new();
    registry.register("echo", processor_fn("echo", echo)).unwrap();
    let pool = WorkerPool::with_handle(&WorkerPoolConfig::new("bench", 8), rt.handle().clone());
    DispatchTemplate::new(Arc::new(registry), pool)
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let template = create_template(&rt);

    c.bench_function("sync_request_body", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(template.request_body::<String>("echo", "Hi").await.unwrap())
            })
        })
    });

    c.bench_function("async_request_body", |b| {
        b.iter(|| {
            rt.block_on(async {
                let handle = template.async_request_body::<String>("echo", "Hi");
                black_box(handle.get().await.unwrap())
            })
        })
    });

    c.bench_function("async_request_body_batch_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let handles: Vec<_> = (0..100)
                    .map(|i| template.async_request_body::<String>("echo", i.to_string()))
                    .collect();
                for handle in handles {
                    black_box(handle.get().await.unwrap());
                }
            })
        })
    });

    rt.block_on(template.shutdown());
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
