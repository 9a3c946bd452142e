//! Command Builders
//!
//! Typed constructors for the requests the remote backend sends.

use std::ops::Bound;
use std::time::Duration;

use bytes::Bytes;

use super::frame::Frame;
use crate::backend::{Coordinate, GeoPoint, ScoreRange};

/// A request: command name followed by its arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: &'static str,
    args: Vec<Bytes>,
}

impl Command {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            args: vec![Bytes::from_static(name.as_bytes())],
        }
    }

    fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn text(self, arg: impl ToString) -> Self {
        self.arg(arg.to_string())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn into_frame(self) -> Frame {
        Frame::request(&self.args)
    }

    pub fn ping() -> Self {
        Self::new("PING")
    }

    pub fn get(key: &str) -> Self {
        Self::new("GET").text(key)
    }

    /// `SET key value [PX ms]`
    pub fn set(key: &str, value: Bytes, ttl: Option<Duration>) -> Self {
        let cmd = Self::new("SET").text(key).arg(value);
        match ttl {
            Some(ttl) => cmd.text("PX").text(ttl.as_millis().max(1)),
            None => cmd,
        }
    }

    pub fn mget<'a>(keys: impl IntoIterator<Item = &'a String>) -> Self {
        keys.into_iter().fold(Self::new("MGET"), |cmd, key| cmd.text(key))
    }

    pub fn del<'a>(keys: impl IntoIterator<Item = &'a String>) -> Self {
        keys.into_iter().fold(Self::new("DEL"), |cmd, key| cmd.text(key))
    }

    pub fn zadd(key: &str, members: &[(f64, String)]) -> Self {
        members
            .iter()
            .fold(Self::new("ZADD").text(key), |cmd, (score, member)| {
                cmd.text(score).text(member)
            })
    }

    /// `ZREVRANGEBYSCORE key max min WITHSCORES [LIMIT 0 count]`
    pub fn zrevrange_by_score(key: &str, range: ScoreRange, limit: Option<usize>) -> Self {
        let cmd = Self::new("ZREVRANGEBYSCORE")
            .text(key)
            .text(score_bound(range.max, "+inf"))
            .text(score_bound(range.min, "-inf"))
            .text("WITHSCORES");
        match limit {
            Some(count) => cmd.text("LIMIT").text(0).text(count),
            None => cmd,
        }
    }

    pub fn zrem(key: &str, members: &[String]) -> Self {
        members
            .iter()
            .fold(Self::new("ZREM").text(key), |cmd, member| cmd.text(member))
    }

    pub fn zremrange_by_score(key: &str, range: ScoreRange) -> Self {
        Self::new("ZREMRANGEBYSCORE")
            .text(key)
            .text(score_bound(range.min, "-inf"))
            .text(score_bound(range.max, "+inf"))
    }

    /// `GEOADD key lon lat member [lon lat member ...]`
    pub fn geoadd(key: &str, points: &[GeoPoint]) -> Self {
        points.iter().fold(Self::new("GEOADD").text(key), |cmd, point| {
            cmd.text(point.coordinate.lon)
                .text(point.coordinate.lat)
                .text(&point.member)
        })
    }

    /// `GEORADIUS key lon lat radius km WITHDIST WITHCOORD ASC`
    pub fn georadius(key: &str, center: Coordinate, radius_km: f64) -> Self {
        Self::new("GEORADIUS")
            .text(key)
            .text(center.lon)
            .text(center.lat)
            .text(radius_km)
            .text("km")
            .text("WITHDIST")
            .text("WITHCOORD")
            .text("ASC")
    }
}

fn score_bound(bound: Bound<f64>, unbounded: &str) -> String {
    match bound {
        Bound::Unbounded => unbounded.to_string(),
        Bound::Included(score) => format_score(score),
        Bound::Excluded(score) => format!("({}", format_score(score)),
    }
}

fn format_score(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(cmd: &Command) -> Vec<String> {
        cmd.args()
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    #[test]
    fn test_set_with_expiry() {
        let cmd = Command::set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(2)));
        assert_eq!(words(&cmd), vec!["SET", "k", "v", "PX", "2000"]);
        assert_eq!(cmd.name(), "SET");

        let cmd = Command::set("k", Bytes::from_static(b"v"), None);
        assert_eq!(words(&cmd), vec!["SET", "k", "v"]);
    }

    #[test]
    fn test_zrevrange_bounds() {
        let cmd = Command::zrevrange_by_score("z", ScoreRange::below(4.5), Some(2));
        assert_eq!(
            words(&cmd),
            vec!["ZREVRANGEBYSCORE", "z", "(4.5", "-inf", "WITHSCORES", "LIMIT", "0", "2"]
        );

        let cmd = Command::zremrange_by_score("z", ScoreRange::below(3.0));
        assert_eq!(words(&cmd), vec!["ZREMRANGEBYSCORE", "z", "-inf", "(3"]);
    }

    #[test]
    fn test_geo_commands_put_longitude_first() {
        let point = GeoPoint {
            member: "7".into(),
            coordinate: Coordinate::new(37.5, -122.25),
        };
        assert_eq!(
            words(&Command::geoadd("g", &[point])),
            vec!["GEOADD", "g", "-122.25", "37.5", "7"]
        );
        assert_eq!(
            words(&Command::georadius("g", Coordinate::new(37.5, -122.25), 1.0)),
            vec!["GEORADIUS", "g", "-122.25", "37.5", "1", "km", "WITHDIST", "WITHCOORD", "ASC"]
        );
    }

    #[test]
    fn test_multi_key_commands() {
        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(words(&Command::mget(&keys)), vec!["MGET", "a", "b"]);
        assert_eq!(words(&Command::del(&keys)), vec!["DEL", "a", "b"]);
    }
}
