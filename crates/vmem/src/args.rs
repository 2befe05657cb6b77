use crate::VmemConfig;
use crate::layout::Platform;
use clap::Parser;
use std::str::FromStr;

#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// Board whose memory layout to build
    #[arg(long, value_enum, default_value_t = Platform::Dreamcast)]
    pub platform: Platform,

    /// Use flat buffers even if the host supports memory aliasing
    #[arg(long)]
    pub no_aliasing: bool,

    /// Size of the CPU context block to reserve below the address space
    /// (hex: 0x1234 or decimal: 1234)
    #[arg(long, value_parser = parse_hex_or_dec, default_value = "0")]
    pub context_block_size: u64,

    /// Mirror the physical window onto the P1, P2 and P3 regions
    #[arg(long)]
    pub mirror_privileged: bool,

    /// Write a 32-bit value before reading anything (ADDR=VALUE, repeatable)
    #[arg(long)]
    pub poke: Vec<Poke>,

    /// Read and print the 32-bit value at this address (repeatable)
    #[arg(long, value_parser = parse_address)]
    pub peek: Vec<u32>,
}

impl Args {
    /// Validate that the arguments are consistent
    pub fn validate(&self) -> Result<(), String> {
        let addresses = self
            .poke
            .iter()
            .map(|poke| poke.addr)
            .chain(self.peek.iter().copied());
        for addr in addresses {
            if addr % 4 != 0 {
                return Err(format!("address {:#010X} is not 4-byte aligned", addr));
            }
        }
        if usize::try_from(self.context_block_size).is_err() {
            return Err("--context-block-size does not fit this host".to_string());
        }
        Ok(())
    }

    /// Convert Args to VmemConfig
    pub fn to_vmem_config(&self) -> VmemConfig {
        VmemConfig {
            platform: self.platform,
            disable_aliasing: self.no_aliasing,
            context_block_size: self.context_block_size as usize,
        }
    }
}

/// A `--poke` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poke {
    pub addr: u32,
    pub value: u32,
}

impl FromStr for Poke {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected ADDR=VALUE, got {:?}", s))?;
        Ok(Self {
            addr: parse_address(addr)?,
            value: parse_address(value)?,
        })
    }
}

pub fn parse_hex_or_dec(s: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

/// Parse a 32-bit guest address or value
pub fn parse_address(s: &str) -> Result<u32, String> {
    let value = parse_hex_or_dec(s).map_err(|e| format!("{:?}: {}", s, e))?;
    u32::try_from(value).map_err(|_| format!("{:?} does not fit in 32 bits", s))
}
