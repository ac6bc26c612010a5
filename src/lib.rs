/*!
# Violation Dashboard

A multi-tenant backend for tracking marketplace policy violations, built in Rust
on top of a spreadsheet service.

## Overview

Each seller account (tenant) owns a spreadsheet with an active tab and a
resolved tab of violation records. A master spreadsheet lists every tenant, its
owner and its spreadsheet URL. This crate serves those records to tenant
dashboards reached through per-tenant subdomains, and gives the internal team a
cross-tenant view with aggregate counters.

## Architecture

### HTTP Layer
- **Technologies**: axum, tower-http
- **Key Components**:
  - Session middleware - Verifies the session token and exposes the caller
  - Tenant resolution - Host subdomain, or a `?tenant=` override for staff
  - Tenant routes - Listing, field edits, bulk edits, resolve, export, support
  - Team routes - Client overview and cross-tenant edits

### Data-Access Layer
- **Core Components**:
  - Sheet Store - Tenant lookup, violation reads and writes, resolve moves
  - Request Gate - Caps concurrent spreadsheet calls, FIFO
  - Retry Policy - Exponential backoff while the service is rate limited
  - TTL Caches - Tenants and the team's client list

### Transport Layer
- Google Sheets v4 REST client over reqwest
- In-memory backend with fault injection for tests

## Modules

- **columns**: Column letters, tab name variants, A1 ranges and the field-to-column table
- **models**: Tenants, violations, statuses and client overview counters
- **sheets**: Spreadsheet transport trait with HTTP and in-memory backends
- **error**: Error types and their HTTP mapping
- **gate**, **retry**, **cache**: Throttling, backoff and expiring caches
- **store**: Data-access operations over tenant and master spreadsheets
- **filter**: Date, status, impact and text filters for listings
- **downloader**: Export functionality (CSV, XLSX, PDF)
- **mailer**: Support ticket delivery over SMTP
- **auth**, **tenancy**: Session verification and host-to-tenant mapping
- **config**, **app**: Environment configuration, routing and middleware

## REST API Endpoints

- `GET /api/tenant` - Tenant for the current subdomain
- `GET /api/violations` - Filtered listing with summary counters
- `PATCH /api/violations/{id}` - Edits one field of one violation
- `POST /api/violations/bulk` - Edits one field of many violations
- `POST /api/violations/{id}/resolve` - Moves a violation to the resolved tab
- `POST /api/support` - Sends a support ticket
- `GET /api/export` - CSV, XLSX or PDF export of a filtered listing
- `GET /api/team/clients` - Per-tenant counters for staff
- `/api/team/clients/{subdomain}/violations[/{id}[/resolve]]` - Staff access to any tenant
*/

pub mod auth;
pub mod cache;
pub mod columns;
pub mod downloader;
pub mod error;
pub mod filter;
pub mod gate;
pub mod mailer;
pub mod models;
pub mod retry;
pub mod sheets;
pub mod store;
pub mod tenancy;

#[cfg(feature = "web")]
pub mod app;
pub mod config;

pub use error::{SheetsError, StoreError};
pub use models::{ClientOverview, ImpactLevel, Tenant, Violation, ViolationStatus};
pub use store::{SheetStore, StoreConfig};
