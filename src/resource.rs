//! Typed resource records and their RFC 1035 wire forms.

use crate::bail;
use crate::dns::write_qname;
use crate::io::DNSReadExt;
use crate::types::{Class, Record, Resource, Type};
use byteorder::{ReadBytesExt, BE};
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::net::{Ipv4Addr, Ipv6Addr};

pub type A = Ipv4Addr;
pub type AAAA = Ipv6Addr;

pub type CNAME = String;
pub type NS = String;
pub type PTR = String;

/// Text record, made up of one or more character strings.
///
/// Per [rfc1035] each string is at most 255 bytes. The strings don't have to
/// be valid UTF-8, so they are kept as raw bytes.
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
#[derive(Clone, Debug, PartialEq)]
pub struct TXT(pub Vec<Vec<u8>>);

/// Mail exchange record.
#[derive(Clone, Debug, PartialEq)]
pub struct MX {
    /// A 16 bit integer which specifies the preference given to this RR among
    /// others at the same owner. Lower values are preferred.
    pub preference: u16,

    /// A <domain-name> which specifies a host willing to act as a mail
    /// exchange for the owner name.
    pub exchange: String,
}

/// Start of authority record.
#[derive(Clone, Debug, PartialEq)]
pub struct SOA {
    /// The <domain-name> of the name server that was the original or primary
    /// source of data for this zone.
    pub mname: String,

    /// A <domain-name> which specifies the mailbox of the person responsible
    /// for this zone.
    pub rname: String,

    pub serial: u32,
    pub refresh: u32, // in seconds
    pub retry: u32,   // in seconds
    pub expire: u32,  // in seconds
    pub minimum: u32, // in seconds
}

/// Server selection record. See [rfc2782].
///
/// [rfc2782]: https://datatracker.ietf.org/doc/html/rfc2782
#[derive(Clone, Debug, PartialEq)]
pub struct SRV {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub name: String,
}

impl Record {
    /// Parses a single resource record, with the cursor positioned just after
    /// the record's type field.
    pub(crate) fn parse(
        cur: &mut Cursor<&[u8]>,
        name: String,
        r#type: Type,
        class: Class,
    ) -> io::Result<Record> {
        let ttl = cur.read_u32::<BE>()?;
        let rd_len = cur.read_u16::<BE>()? as u64;
        let start = cur.position();

        let resource = Resource::parse(cur, r#type, rd_len)?;

        if cur.position() != start + rd_len {
            bail!(
                InvalidData,
                "record data for '{}' did not match its declared length",
                name
            );
        }

        Ok(Record {
            name,
            class,
            ttl,
            resource,
        })
    }

    /// Writes this record, including its owner name and header fields.
    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        write_qname(buf, &self.name)?;

        buf.extend_from_slice(&(self.r#type() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.class as u16).to_be_bytes());
        buf.extend_from_slice(&self.ttl.to_be_bytes());

        // Two byte RDLENGTH, back-patched once the RDATA is written.
        let len_at = buf.len();
        buf.extend_from_slice(&[0, 0]);

        self.resource.write(buf)?;

        let rd_len = buf.len() - len_at - 2;
        if rd_len > u16::MAX as usize {
            bail!(InvalidData, "record data longer than 65535 bytes");
        }
        buf[len_at..len_at + 2].copy_from_slice(&(rd_len as u16).to_be_bytes());

        Ok(())
    }
}

impl Resource {
    fn parse(cur: &mut Cursor<&[u8]>, r#type: Type, rd_len: u64) -> io::Result<Resource> {
        Ok(match r#type {
            Type::A => {
                if rd_len != 4 {
                    bail!(InvalidData, "invalid A record length ({}) expected 4", rd_len);
                }
                Resource::A(Ipv4Addr::from(cur.read_u32::<BE>()?))
            }

            Type::AAAA => {
                if rd_len != 16 {
                    bail!(
                        InvalidData,
                        "invalid AAAA record length ({}) expected 16",
                        rd_len
                    );
                }
                Resource::AAAA(Ipv6Addr::from(cur.read_u128::<BE>()?))
            }

            Type::CNAME => Resource::CNAME(cur.read_qname()?),
            Type::NS => Resource::NS(cur.read_qname()?),
            Type::PTR => Resource::PTR(cur.read_qname()?),

            Type::TXT => {
                let end = cur.position() + rd_len;
                let mut txts = Vec::new();

                while cur.position() < end {
                    let len = cur.read_u8()? as u64;
                    if cur.position() + len > end {
                        bail!(InvalidData, "TXT record too short");
                    }

                    let mut txt = vec![0; len as usize];
                    cur.read_exact(&mut txt)?;
                    txts.push(txt);
                }

                Resource::TXT(TXT(txts))
            }

            Type::MX => Resource::MX(MX {
                preference: cur.read_u16::<BE>()?,
                exchange: cur.read_qname()?,
            }),

            Type::SOA => Resource::SOA(SOA {
                mname: cur.read_qname()?,
                rname: cur.read_qname()?,
                serial: cur.read_u32::<BE>()?,
                refresh: cur.read_u32::<BE>()?,
                retry: cur.read_u32::<BE>()?,
                expire: cur.read_u32::<BE>()?,
                minimum: cur.read_u32::<BE>()?,
            }),

            Type::SRV => Resource::SRV(SRV {
                priority: cur.read_u16::<BE>()?,
                weight: cur.read_u16::<BE>()?,
                port: cur.read_u16::<BE>()?,
                name: cur.read_qname()?,
            }),

            // OPT is parsed as an Extension, and the pseudo types never
            // appear in a record on the wire.
            Type::Reserved | Type::OPT | Type::ANY => {
                bail!(InvalidData, "unsupported record type '{}'", r#type)
            }
        })
    }

    fn write(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        match self {
            Resource::A(ip) => buf.extend_from_slice(&ip.octets()),
            Resource::AAAA(ip) => buf.extend_from_slice(&ip.octets()),

            Resource::CNAME(name) | Resource::NS(name) | Resource::PTR(name) => {
                write_qname(buf, name)?
            }

            Resource::TXT(txt) => {
                for chunk in &txt.0 {
                    if chunk.len() > 255 {
                        bail!(
                            InvalidData,
                            "TXT string longer than 255 bytes ({})",
                            chunk.len()
                        );
                    }
                    buf.push(chunk.len() as u8);
                    buf.extend_from_slice(chunk);
                }
            }

            Resource::MX(mx) => {
                buf.extend_from_slice(&mx.preference.to_be_bytes());
                write_qname(buf, &mx.exchange)?;
            }

            Resource::SOA(soa) => {
                write_qname(buf, &soa.mname)?;
                write_qname(buf, &soa.rname)?;
                buf.extend_from_slice(&soa.serial.to_be_bytes());
                buf.extend_from_slice(&soa.refresh.to_be_bytes());
                buf.extend_from_slice(&soa.retry.to_be_bytes());
                buf.extend_from_slice(&soa.expire.to_be_bytes());
                buf.extend_from_slice(&soa.minimum.to_be_bytes());
            }

            Resource::SRV(srv) => {
                buf.extend_from_slice(&srv.priority.to_be_bytes());
                buf.extend_from_slice(&srv.weight.to_be_bytes());
                buf.extend_from_slice(&srv.port.to_be_bytes());
                write_qname(buf, &srv.name)?;
            }

            Resource::OPT | Resource::ANY => {
                bail!(InvalidData, "'{}' records can not be encoded", self.r#type())
            }
        }

        Ok(())
    }
}
