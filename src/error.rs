// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;
use uuid::Uuid;

use crate::addr::AddrError;
use crate::backend::StoreError;
use crate::reflink::ReflinkError;
use crate::schema::Table;
use crate::tree::TreeError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid {table} row {uuid}: {reason}")]
    InvalidRow { table: Table, uuid: Uuid, reason: String },
    #[error("{table} {uuid} not found in cache")]
    NotFound { table: Table, uuid: Uuid },
    #[error("No IP_Interface for interface {0}")]
    UnknownInterface(String),
    #[error("Address {addr} not found on {ifname}")]
    AddressNotFound { ifname: String, addr: String },
    #[error("Reference graph error: {0}")]
    Reflink(#[from] ReflinkError),
    #[error("Index error: {0}")]
    Tree(#[from] TreeError),
    #[error("Write-back failed: {0}")]
    Store(#[from] StoreError),
    #[error("Address error: {0}")]
    Addr(#[from] AddrError),
}
