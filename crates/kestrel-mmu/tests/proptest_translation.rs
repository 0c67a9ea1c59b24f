use kestrel_isa::{EF_PAGING_ENABLE, EF_PROTECTED_ENABLE};
use kestrel_mem::{DenseMemory, PhysMemory};
use kestrel_mmu::{
    translate, AccessType, TranslateError, PTE_EXECUTABLE, PTE_OCCUPIED, PTE_PROTECTED,
    PTE_WRITABLE,
};
use proptest::prelude::*;

#[derive(Clone, Debug)]
struct Mapping {
    occupied: bool,
    protected: bool,
    writable: bool,
    executable: bool,
    phys_page: u32,
}

prop_compose! {
    fn arb_mapping(max_phys_pages: u32)(
        occupied in any::<bool>(),
        protected in any::<bool>(),
        writable in any::<bool>(),
        executable in any::<bool>(),
        phys_page in 8u32..max_phys_pages,
    ) -> Mapping {
        Mapping {
            occupied,
            protected,
            writable,
            executable,
            phys_page: phys_page << 12,
        }
    }
}

fn arb_access() -> impl Strategy<Value = AccessType> {
    prop_oneof![
        Just(AccessType::Read),
        Just(AccessType::Write),
        Just(AccessType::Execute),
    ]
}

const RPT: u64 = 0x1000;
const PAGE_TABLE: u32 = 0x2000;

/// Page index for the i-th mapping.
///
/// Entries are addressed at byte offsets, so consecutive page indices would
/// overlap in the table; a stride of 4 keeps each 4-byte entry disjoint.
fn page_index(i: usize) -> u32 {
    (i as u32) * 4
}

fn build_tables(mappings: &[Mapping]) -> DenseMemory {
    let mut mem = DenseMemory::new(64 * 4096);
    mem.write_u32_le(RPT, PAGE_TABLE | PTE_OCCUPIED | PTE_WRITABLE | PTE_EXECUTABLE)
        .unwrap();
    for (i, m) in mappings.iter().enumerate() {
        let mut entry = m.phys_page;
        if m.occupied {
            entry |= PTE_OCCUPIED;
        }
        if m.protected {
            entry |= PTE_PROTECTED;
        }
        if m.writable {
            entry |= PTE_WRITABLE;
        }
        if m.executable {
            entry |= PTE_EXECUTABLE;
        }
        mem.write_u32_le(PAGE_TABLE as u64 + page_index(i) as u64, entry)
            .unwrap();
    }
    mem
}

/// The §4.2 check ladder, restated independently of the walk.
fn expected_missing(m: &Mapping, access: AccessType, user: bool) -> Option<u32> {
    if !m.occupied {
        return Some(PTE_OCCUPIED);
    }
    if user && m.protected {
        return Some(PTE_PROTECTED);
    }
    if user && access.is_write() && !m.writable {
        return Some(PTE_WRITABLE);
    }
    if user && access.is_execute() && !m.executable {
        return Some(PTE_EXECUTABLE);
    }
    None
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn walk_matches_the_check_ladder(
        mappings in prop::collection::vec(arb_mapping(64), 1..8),
        accesses in prop::collection::vec((0usize..8usize, 0u16..4096u16, arb_access(), any::<bool>()), 1..32),
    ) {
        let mut mem = build_tables(&mappings);

        for (page_idx, offset, access, user) in accesses {
            let Some(mapping) = mappings.get(page_idx) else { continue };
            let vaddr = (page_index(page_idx) << 12) | offset as u32;
            let mut eflags = EF_PAGING_ENABLE;
            if user {
                eflags |= EF_PROTECTED_ENABLE;
            }

            let res = translate(&mut mem, vaddr, access, eflags, RPT);
            match expected_missing(mapping, access, user) {
                None => {
                    prop_assert_eq!(res, Ok(mapping.phys_page + offset as u32));
                }
                Some(missing) => match res {
                    Err(TranslateError::PageFault(pf)) => {
                        prop_assert_eq!(pf.addr, vaddr);
                        prop_assert_eq!(pf.missing, missing);
                    }
                    other => prop_assert!(false, "expected fault, got {:?}", other),
                },
            }
        }
    }
}
