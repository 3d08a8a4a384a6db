use std::hint::black_box;

use certchain::{
    certificate::{Certificate, SourceFormat},
    chain::{ChainBuilder, ChainValidator},
    codec::{CertificateCodec, InputFormat},
};
use criterion::{criterion_group, criterion_main, Criterion};
use openssl::{
    asn1::Asn1Time,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    x509::{extension::BasicConstraints, X509Builder, X509NameBuilder, X509},
};

fn key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn certificate(cn: &str, key: &PKey<Private>, issuer: Option<(&X509, &PKey<Private>)>) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder
        .set_issuer_name(issuer.map_or(&*name, |(cert, _)| cert.subject_name()))
        .unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().ca().build().unwrap())
        .unwrap();
    builder
        .sign(issuer.map_or(key, |(_, k)| k), MessageDigest::sha256())
        .unwrap();
    builder.build()
}

/// Root first, `depth` certificates in total
fn chain(depth: usize) -> Vec<X509> {
    let mut keys = vec![key()];
    let mut certs = vec![certificate("bench-0", &keys[0], None)];

    for i in 1..depth {
        keys.push(key());
        let cert = certificate(
            &format!("bench-{i}"),
            &keys[i],
            Some((&certs[i - 1], &keys[i - 1])),
        );
        certs.push(cert);
    }

    certs
}

fn criterion_benchmark(c: &mut Criterion) {
    let x509s = chain(5);

    // root first, so every placement needs a full scan
    let shuffled: Vec<Certificate> = x509s
        .iter()
        .map(|x509| Certificate::from_x509(x509, SourceFormat::Pem).unwrap())
        .collect();
    let pem: Vec<u8> = x509s
        .iter()
        .rev()
        .flat_map(|x509| x509.to_pem().unwrap())
        .collect();

    let builder = ChainBuilder::new();
    let validator = ChainValidator::new();
    let codec = CertificateCodec::new();

    let mut group = c.benchmark_group("Chain resolution");

    group.bench_function("build_and_validate_5", |b| {
        b.iter(|| validator.validate(builder.build(black_box(shuffled.clone()))))
    });

    group.bench_function("decode_pem_5", |b| {
        b.iter(|| {
            codec
                .decode(black_box(&pem), InputFormat::Auto, None, None)
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
