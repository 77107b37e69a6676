// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod athlete;
pub mod ride;

pub use athlete::{Athlete, AthleteTokens};
pub use ride::{
    GeoPoint, Ride, RideError, RideGeo, RidePhoto, RideTrack, SegmentEffort, WorkflowDimension,
    WorkflowFlag,
};
