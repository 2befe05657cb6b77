use clap::Parser;
use tracing::info;
use vmem::{AddressSpace, Args, PageEntry, RegionKind};

fn main() {
    // Parse command-line arguments
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = args.to_vmem_config();

    info!("=== Creating Address Space ({:?}) ===", config.platform);
    let mut space = AddressSpace::new(config);
    let aliased = space.reserve();
    info!("Aliasing: {}", if aliased { "enabled" } else { "disabled" });

    if let Err(e) = space.init_mappings() {
        eprintln!("Failed to map guest memory: {}", e);
        std::process::exit(2);
    }
    if args.mirror_privileged {
        space.mirror_privileged_regions();
    }

    info!("Strategy: {:?}", space.strategy());
    for kind in [
        RegionKind::Ram,
        RegionKind::Vram,
        RegionKind::Aram,
        RegionKind::Eram,
    ] {
        if let Some(region) = space.backing(kind) {
            info!(
                "  {}: {:p} ({}KB)",
                kind,
                region.as_ptr(),
                region.size() / 1024
            );
        }
    }
    if let Some(base) = space.virtual_base() {
        info!("  Virtual base: {:p}", base.as_ptr());
    }

    info!("=== Page Directory ===");
    for (page, entry) in space.directory().iter() {
        if let PageEntry::Block { .. } = entry {
            info!("  {:#04X}: {:?}", page, entry);
        }
    }

    for poke in &args.poke {
        info!("Poke {:#010X} = {:#010X}", poke.addr, poke.value);
        space.write32(poke.addr, poke.value);
    }

    for &addr in &args.peek {
        let value = space.read32(addr);
        println!("{:#010X}: {:#010X}", addr, value);
    }

    space.release();
    info!("=== Released ===");
}
