//! Allocation-table behaviour across whole subnets and processes.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;
use std::net::Ipv4Addr;

use corral_common::error::CorralError;
use corral_network::ipam::Ipam;
use ipnetwork::Ipv4Network;

fn ipam() -> (tempfile::TempDir, Ipam) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ipam = Ipam::new(dir.path().join("ipam").join("subnet.json"));
    (dir, ipam)
}

// ── Exhaustion ───────────────────────────────────────────────────────

#[test]
fn every_subnet_yields_all_but_one_address_then_exhausts() {
    for cidr in ["10.1.0.0/30", "10.2.0.0/29", "10.3.0.0/28", "10.4.0.0/24"] {
        let (_dir, ipam) = ipam();
        let subnet: Ipv4Network = cidr.parse().unwrap();
        let host_bits = 32 - u32::from(subnet.prefix());
        let expected = (1usize << host_bits) - 1;

        let mut seen = HashSet::new();
        for _ in 0..expected {
            let ip = ipam.allocate(&subnet).unwrap();
            assert!(subnet.contains(ip), "{ip} outside {cidr}");
            assert!(seen.insert(ip), "{ip} handed out twice in {cidr}");
        }
        assert_eq!(seen.len(), expected);

        match ipam.allocate(&subnet) {
            Err(CorralError::AddressExhausted { subnet: s }) => assert_eq!(s, cidr),
            other => panic!("expected exhaustion for {cidr}, got {other:?}"),
        }
    }
}

#[test]
fn slash_32_has_nothing_to_give() {
    let (_dir, ipam) = ipam();
    let err = ipam.allocate(&"10.9.9.9/32".parse().unwrap()).unwrap_err();
    assert!(matches!(err, CorralError::AddressExhausted { .. }));
}

// ── Reuse ────────────────────────────────────────────────────────────

#[test]
fn allocate_release_allocate_returns_same_address() {
    let (_dir, ipam) = ipam();
    let subnet: Ipv4Network = "192.168.50.0/24".parse().unwrap();

    let first = ipam.allocate(&subnet).unwrap();
    ipam.release(&subnet, first).unwrap();
    let second = ipam.allocate(&subnet).unwrap();
    assert_eq!(first, second);
}

#[test]
fn released_hole_is_filled_before_higher_addresses() {
    let (_dir, ipam) = ipam();
    let subnet: Ipv4Network = "172.20.0.0/24".parse().unwrap();

    let gateway = ipam.allocate(&subnet).unwrap();
    let a = ipam.allocate(&subnet).unwrap();
    let b = ipam.allocate(&subnet).unwrap();
    assert_eq!(
        (gateway, a, b),
        (
            Ipv4Addr::new(172, 20, 0, 1),
            Ipv4Addr::new(172, 20, 0, 2),
            Ipv4Addr::new(172, 20, 0, 3)
        )
    );

    ipam.release(&subnet, a).unwrap();
    assert_eq!(ipam.allocate(&subnet).unwrap(), a);
    assert_eq!(ipam.allocate(&subnet).unwrap(), Ipv4Addr::new(172, 20, 0, 4));
}

#[test]
fn subnets_are_tracked_independently() {
    let (_dir, ipam) = ipam();
    let a: Ipv4Network = "10.10.0.0/24".parse().unwrap();
    let b: Ipv4Network = "10.20.0.0/24".parse().unwrap();

    assert_eq!(ipam.allocate(&a).unwrap(), Ipv4Addr::new(10, 10, 0, 1));
    assert_eq!(ipam.allocate(&b).unwrap(), Ipv4Addr::new(10, 20, 0, 1));
    assert_eq!(ipam.allocate(&a).unwrap(), Ipv4Addr::new(10, 10, 0, 2));
}

// ── Persistence and locking ──────────────────────────────────────────

#[test]
fn state_survives_a_new_allocator_instance() {
    let (dir, ipam) = ipam();
    let subnet: Ipv4Network = "10.30.0.0/24".parse().unwrap();
    let _ = ipam.allocate(&subnet).unwrap();

    let reopened = Ipam::new(dir.path().join("ipam").join("subnet.json"));
    assert_eq!(reopened.allocate(&subnet).unwrap(), Ipv4Addr::new(10, 30, 0, 2));
}

#[test]
fn concurrent_allocators_never_share_an_address() {
    let (dir, _) = ipam();
    let path = dir.path().join("ipam").join("subnet.json");
    let subnet: Ipv4Network = "10.40.0.0/24".parse().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            std::thread::spawn(move || {
                let ipam = Ipam::new(path);
                (0..10).map(|_| ipam.allocate(&subnet).unwrap()).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for ip in handle.join().unwrap() {
            assert!(all.insert(ip), "{ip} allocated twice");
        }
    }
    assert_eq!(all.len(), 80);
}
