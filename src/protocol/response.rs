//! Reply decoding
//!
//! Turns reply frames into the shapes the backend trait returns. Error
//! frames become `CacheError::Server`; anything else unexpected is a
//! protocol error.

use bytes::Bytes;

use super::frame::Frame;
use crate::backend::{Coordinate, GeoMatch};
use crate::error::{CacheError, Result};

fn unexpected(expected: &str, frame: &Frame) -> CacheError {
    CacheError::Protocol(format!("expected {}, got {:?}", expected, frame))
}

/// `+OK` (or any status reply)
pub fn ok(frame: Frame) -> Result<()> {
    match frame {
        Frame::Simple(_) => Ok(()),
        Frame::Error(msg) => Err(CacheError::Server(msg)),
        other => Err(unexpected("status", &other)),
    }
}

pub fn bulk(frame: Frame) -> Result<Option<Bytes>> {
    match frame {
        Frame::Bulk(data) => Ok(Some(data)),
        Frame::Null => Ok(None),
        Frame::Error(msg) => Err(CacheError::Server(msg)),
        other => Err(unexpected("bulk string", &other)),
    }
}

pub fn integer(frame: Frame) -> Result<u64> {
    match frame {
        Frame::Integer(n) => Ok(n.max(0) as u64),
        Frame::Error(msg) => Err(CacheError::Server(msg)),
        other => Err(unexpected("integer", &other)),
    }
}

fn array(frame: Frame) -> Result<Vec<Frame>> {
    match frame {
        Frame::Array(items) => Ok(items),
        Frame::Null => Ok(Vec::new()),
        Frame::Error(msg) => Err(CacheError::Server(msg)),
        other => Err(unexpected("array", &other)),
    }
}

/// MGET reply
pub fn bulk_array(frame: Frame) -> Result<Vec<Option<Bytes>>> {
    array(frame)?.into_iter().map(bulk).collect()
}

fn text(frame: Frame) -> Result<String> {
    match frame {
        Frame::Bulk(data) => String::from_utf8(data.to_vec())
            .map_err(|e| CacheError::Protocol(format!("non utf-8 member: {}", e))),
        Frame::Simple(s) => Ok(s),
        Frame::Error(msg) => Err(CacheError::Server(msg)),
        other => Err(unexpected("string", &other)),
    }
}

fn float(frame: Frame) -> Result<f64> {
    let raw = text(frame)?;
    match raw.as_str() {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => raw
            .parse()
            .map_err(|_| CacheError::Protocol(format!("invalid float `{}`", raw))),
    }
}

/// `WITHSCORES` reply: flat member, score pairs
pub fn scored_members(frame: Frame) -> Result<Vec<(String, f64)>> {
    let items = array(frame)?;
    if items.len() % 2 != 0 {
        return Err(CacheError::Protocol("odd length WITHSCORES reply".into()));
    }

    let mut members = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
        members.push((text(member)?, float(score)?));
    }
    Ok(members)
}

/// `WITHDIST WITHCOORD` reply: `[member, distance, [lon, lat]]` per match
pub fn geo_matches(frame: Frame) -> Result<Vec<GeoMatch>> {
    array(frame)?
        .into_iter()
        .map(|item| {
            let mut fields = array(item)?.into_iter();
            let (Some(member), Some(distance), Some(coord)) = (fields.next(), fields.next(), fields.next()) else {
                return Err(CacheError::Protocol("short GEORADIUS entry".into()));
            };
            let mut coord = array(coord)?.into_iter();
            let (Some(lon), Some(lat)) = (coord.next(), coord.next()) else {
                return Err(CacheError::Protocol("short GEORADIUS coordinate".into()));
            };
            Ok(GeoMatch {
                member: text(member)?,
                distance_km: float(distance)?,
                coordinate: Coordinate::new(float(lat)?, float(lon)?),
            })
        })
        .collect()
}
