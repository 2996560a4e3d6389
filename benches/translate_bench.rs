// Benchmark for reading and translating FDM printables
// Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use async_trait::async_trait;
use printmgr_rs::printable::{FdmReader, FdmSink, ReadError, ReadOptions};
use printmgr_rs::translation::vendors::ULTIMAKER_2;
use printmgr_rs::{TranslatorFactory, TranslatorOptions};
use printmgr_shared::{CommandType, FdmCommand, FdmHeader, PrinterType, PrintableMessage, FDM_MAGIC};
use std::path::{Path, PathBuf};

const MOVES: usize = 20_000;

fn write_printable(dir: &Path) -> PathBuf {
    let mut bytes = FDM_MAGIC.to_be_bytes().to_vec();
    let header = FdmHeader {
        printer_type_id: ULTIMAKER_2.into(),
        ..Default::default()
    };
    bytes.extend(header.encode_framed());
    for i in 0..MOVES {
        let mut cmd = FdmCommand::new(CommandType::ExtrudeMove);
        cmd.x = vec![(i % 200) as f64];
        cmd.y = vec![(i / 200) as f64];
        cmd.e = vec![i as f64 * 0.25];
        cmd.f = vec![1500.0];
        bytes.extend(cmd.encode_framed());
    }
    bytes.extend(FdmCommand::new(CommandType::EndOfCommands).encode_framed());
    let path = dir.join("bench.mic");
    std::fs::write(&path, bytes).unwrap();
    path
}

struct Discard;

#[async_trait]
impl FdmSink for Discard {
    type Error = ReadError;

    async fn on_command(&mut self, _command: FdmCommand) -> Result<(), ReadError> {
        Ok(())
    }
}

fn bench_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let input = write_printable(dir.path());
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("read 20k FDM commands", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut reader = FdmReader::new(ReadOptions::default());
                let count = reader.read(&input, &mut Discard).await.unwrap();
                assert_eq!(count, MOVES + 1);
            });
        });
    });
}

fn bench_translate(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let input = write_printable(dir.path());
    let output = dir.path().join("bench.gcode");
    let factory = TranslatorFactory::with_builtin_translators(TranslatorOptions::default());
    let printer_type = PrinterType {
        id: ULTIMAKER_2.into(),
        ..Default::default()
    };
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("translate 20k moves to Marlin", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut translator = factory.get(&printer_type, None, None).unwrap();
                translator.translate(&input, &output).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_read, bench_translate);
criterion_main!(benches);
